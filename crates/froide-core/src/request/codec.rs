//! Secret reply addresses.
//!
//! Two schemes coexist:
//!
//! - **Current**: an opaque `<owner-slug>.<token>@domain` stored on the
//!   request and resolved by equality lookup.
//! - **Legacy**: `<hero-name>_<request-id>@domain`. The hero name is a
//!   deterministic pseudonym of the id, so a guessed id alone does not yield
//!   a deliverable address. Two generators have been in use and both are
//!   accepted.

use rand::Rng;

use super::model::{FoiRequest, RequestId, slugify};
use super::repository::RequestRepository;
use crate::Result;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 10;

const GIVEN_NAMES: &[&str] = &[
    "achilles", "andromeda", "antigone", "ariadne", "atalanta", "cassandra", "daedalus",
    "electra", "hector", "helena", "hermes", "iason", "kassiopeia", "medea", "odysseus",
    "orpheus", "penelope", "perseus", "prometheus", "theseus", "europa", "kadmos", "nestor",
    "sisyphos", "telemachos", "aeneas", "kalypso", "diomedes", "patroklos", "phaidra", "io",
    "niobe",
];

const EPITHETS: &[&str] = &[
    "brave", "bright", "calm", "clever", "curious", "daring", "eager", "fair", "gentle",
    "honest", "kind", "loyal", "merry", "noble", "patient", "proud", "quick", "quiet",
    "sharp", "steady", "swift", "true", "wise", "bold",
];

/// Mixes the bits of a request id (splitmix64 finalizer).
#[allow(clippy::cast_sign_loss)]
const fn mix(id: i64) -> u64 {
    let mut z = (id as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[allow(clippy::cast_possible_truncation)]
fn pick<'a>(list: &[&'a str], n: u64) -> &'a str {
    list[(n % list.len() as u64) as usize]
}

/// Hero name issued by the current legacy-address generator.
#[must_use]
pub fn hero_name(id: RequestId) -> String {
    let bits = mix(id.0);
    format!(
        "{}.{}",
        pick(EPITHETS, bits >> 32),
        pick(GIVEN_NAMES, bits & 0xFFFF_FFFF)
    )
}

/// Hero name issued by the superseded generator.
///
/// Derived from the id alone, so these addresses are guessable. Accepted
/// only so that addresses issued before the switch keep resolving.
#[must_use]
pub fn old_hero_name(id: RequestId) -> String {
    pick(GIVEN_NAMES, id.0.unsigned_abs()).to_string()
}

/// Builds the legacy address `<hero-name>_<id>@domain`.
#[must_use]
pub fn legacy_address(id: RequestId, domain: &str) -> String {
    format!("{}_{}@{domain}", hero_name(id), id)
}

/// Splits a legacy address into hero name and request id.
///
/// Returns `None` when there is no `_` separator or the suffix is not a
/// number. The hero name is not checked here.
#[must_use]
pub fn decode_legacy_address(address: &str) -> Option<(&str, RequestId)> {
    let local = address.split_once('@').map_or(address, |(local, _)| local);
    let (name, suffix) = local.rsplit_once('_')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = suffix.parse::<i64>().ok()?;
    Some((name, RequestId::new(id)))
}

/// Returns true if `name` is one of the hero names ever issued for `id`.
#[must_use]
pub fn is_valid_hero_name(name: &str, id: RequestId) -> bool {
    name == hero_name(id) || name == old_hero_name(id)
}

/// Generates a new current-scheme secret address.
#[must_use]
pub fn generate_secret_address(owner_name: &str, domain: &str) -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..TOKEN_LEN)
        .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
        .collect();
    let slug = slugify(owner_name).replace('-', ".");
    if slug.is_empty() {
        format!("{token}@{domain}")
    } else {
        format!("{slug}.{token}@{domain}")
    }
}

/// Finds the request an address belongs to.
///
/// Tries the current scheme first, then the legacy one. Malformed addresses
/// are simply not found.
///
/// # Errors
///
/// Returns an error only if a database query fails.
pub async fn resolve_request_from_email(
    requests: &RequestRepository,
    address: &str,
) -> Result<Option<FoiRequest>> {
    let address = address.trim().to_lowercase();
    if address.is_empty() {
        return Ok(None);
    }

    if let Some(request) = requests.get_by_secret_address(&address).await? {
        return Ok(Some(request));
    }

    let Some((name, id)) = decode_legacy_address(&address) else {
        return Ok(None);
    };
    if !is_valid_hero_name(name, id) {
        tracing::debug!(address = %address, "legacy address with mismatched hero name");
        return Ok(None);
    }
    requests.get(id).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::Database;
    use crate::request::NewRequest;

    #[test]
    fn test_hero_names_are_stable() {
        let id = RequestId::new(42);
        assert_eq!(hero_name(id), hero_name(id));
        assert!(!hero_name(id).contains('_'));
        assert_eq!(old_hero_name(id), GIVEN_NAMES[42 % GIVEN_NAMES.len()]);
    }

    #[test]
    fn test_decode_rejects_non_numeric_suffix() {
        assert_eq!(decode_legacy_address("brave.hector_12x@foi.example"), None);
        assert_eq!(decode_legacy_address("brave.hector_@foi.example"), None);
        assert_eq!(decode_legacy_address("nounderscore@foi.example"), None);
        assert_eq!(decode_legacy_address("a_-5@foi.example"), None);
    }

    #[test]
    fn test_generate_secret_address_shape() {
        let address = generate_secret_address("Anna Müller", "foi.example");
        let (local, domain) = address.split_once('@').unwrap();
        assert_eq!(domain, "foi.example");
        let (slug, token) = local.rsplit_once('.').unwrap();
        assert_eq!(slug, "anna.mueller");
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_resolve_both_schemes() {
        let db = Database::in_memory().await.unwrap();
        let requests = db.requests();
        let request = requests
            .create(
                &NewRequest::new("Akten", "Anna").with_secret_address("anna.k3j5h6g7f8@foi.example"),
                "foi.example",
            )
            .await
            .unwrap();

        let current = resolve_request_from_email(&requests, "Anna.K3J5H6G7F8@foi.example")
            .await
            .unwrap();
        assert_eq!(current.unwrap().id, request.id);

        let legacy = legacy_address(request.id, "foi.example");
        let found = resolve_request_from_email(&requests, &legacy).await.unwrap();
        assert_eq!(found.unwrap().id, request.id);

        let old = format!("{}_{}@foi.example", old_hero_name(request.id), request.id);
        assert!(resolve_request_from_email(&requests, &old).await.unwrap().is_some());

        let forged = format!("mallory_{}@foi.example", request.id);
        assert!(resolve_request_from_email(&requests, &forged).await.unwrap().is_none());

        let corrupted = legacy.replace(&format!("_{}@", request.id), "_4x2@");
        assert!(resolve_request_from_email(&requests, &corrupted).await.unwrap().is_none());
    }

    proptest! {
        #[test]
        fn legacy_address_decodes_to_its_id(id in 1i64..10_000_000) {
            let id = RequestId::new(id);
            let address = legacy_address(id, "foi.example");
            let (name, decoded) = decode_legacy_address(&address).unwrap();
            prop_assert_eq!(decoded, id);
            prop_assert!(is_valid_hero_name(name, id));
        }

        #[test]
        fn decode_never_panics(s in "\\PC*") {
            let _ = decode_legacy_address(&s);
        }
    }
}
