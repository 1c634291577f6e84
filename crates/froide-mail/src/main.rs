//! Froide inbound mail worker.
//!
//! Polls the FOI mailbox, accepts webhook payloads and `.eml` files, and
//! gives operators access to quarantined mail and outbound retries.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use froide_core::deferred::DeferredId;
use froide_core::{
    ChannelDispatcher, ContentPolicy, Database, MailConfig, MailPipeline, MailboxFetcher,
    MessageId, OutboundService, ProcessReport, RequestId, SmtpTransport, Task, TracingNotifier,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "froide-mail", version, about = "Froide inbound mail worker")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "froide-mail.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drain unseen mail from the mailbox once.
    Fetch {
        /// Leave fetched mail unseen on the server.
        #[arg(long)]
        no_flag: bool,
    },
    /// Replay one .eml file with manual semantics.
    Inject {
        /// The raw mail.
        file: PathBuf,
    },
    /// Process a webhook payload (`{"raw": "..."}`), `-` reads stdin.
    Webhook {
        /// Payload file.
        file: String,
    },
    /// Redeliver a quarantined mail to a request.
    Redeliver {
        /// Quarantine record id.
        deferred_id: i64,
        /// Target request id.
        request_id: i64,
    },
    /// Redeliver quarantined mail whose recipient is known from history.
    AutoRedeliver,
    /// List quarantined mail awaiting an operator.
    Deferred,
    /// Flag a quarantined mail (and its sender) as spam.
    MarkSpam {
        /// Quarantine record id.
        deferred_id: i64,
    },
    /// Clear the spam flag of a quarantined mail.
    MarkNotSpam {
        /// Quarantine record id.
        deferred_id: i64,
    },
    /// Send an outbound message.
    Send {
        /// Message id.
        message_id: i64,
    },
    /// Retry an outbound message that was not sent.
    Resend {
        /// Message id.
        message_id: i64,
    },
    /// Create the database schema.
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "froide_mail=info,froide_core=info,froide_imap=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // IMAP and SMTP both use rustls; pick the provider once.
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let cli = Cli::parse();
    let config = MailConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open database {}", config.database_path))?;
    let config = Arc::new(config);

    let (dispatcher, mut tasks) = ChannelDispatcher::channel();
    let dispatcher = Arc::new(dispatcher);
    let policy = Arc::new(
        ContentPolicy::from_settings(&config.hide_content).context("invalid hide_content rules")?,
    );
    let pipeline = MailPipeline::new(
        &db,
        Arc::clone(&config),
        policy,
        Arc::new(TracingNotifier),
        dispatcher.clone(),
    );

    match cli.command {
        Command::Fetch { no_flag } => {
            let fetcher = MailboxFetcher::new(config.imap.clone());
            let count = pipeline
                .fetch_and_process(&fetcher, !no_flag)
                .await
                .context("fetch failed")?;
            info!(count, "mailbox drained");
        }
        Command::Inject { file } => {
            let report = pipeline
                .inject_file(&file)
                .await
                .with_context(|| format!("failed to inject {}", file.display()))?;
            print_report(&report);
        }
        Command::Webhook { file } => {
            let body = read_payload(&file).await?;
            let report = pipeline.process_webhook(&body).await.context("webhook failed")?;
            print_report(&report);
        }
        Command::Redeliver {
            deferred_id,
            request_id,
        } => {
            let report = pipeline
                .redeliver(DeferredId::new(deferred_id), RequestId::new(request_id))
                .await
                .context("redelivery failed")?;
            print_report(&report);
        }
        Command::AutoRedeliver => {
            let count = pipeline.auto_redeliver_pending().await?;
            println!("redelivered {count} quarantined mails");
        }
        Command::Deferred => {
            for deferred in db.deferred().list_undelivered().await? {
                println!(
                    "{}\t{}\t{}\t{}\thint={}",
                    deferred.id,
                    deferred.timestamp.format("%Y-%m-%d %H:%M"),
                    deferred.recipient,
                    deferred.sender,
                    deferred
                        .hint_request_id
                        .map_or_else(|| "-".to_string(), |id| id.to_string()),
                );
            }
        }
        Command::MarkSpam { deferred_id } => {
            db.deferred().mark_spam(DeferredId::new(deferred_id)).await?;
        }
        Command::MarkNotSpam { deferred_id } => {
            db.deferred()
                .mark_not_spam(DeferredId::new(deferred_id))
                .await?;
        }
        Command::Send { message_id } => {
            let service = outbound(&db, &config, dispatcher.clone())?;
            let status = service.send_message(MessageId::new(message_id)).await?;
            println!("message {message_id}: {} (retries: {})", status.status, status.retry_count);
        }
        Command::Resend { message_id } => {
            let service = outbound(&db, &config, dispatcher.clone())?;
            let status = service.resend(MessageId::new(message_id)).await?;
            println!("message {message_id}: {} (retries: {})", status.status, status.retry_count);
        }
        Command::InitDb => {
            info!(path = %config.database_path, "database ready");
        }
    }

    log_pending_tasks(&mut tasks);
    Ok(())
}

fn outbound(
    db: &Database,
    config: &Arc<MailConfig>,
    dispatcher: Arc<ChannelDispatcher>,
) -> anyhow::Result<OutboundService<SmtpTransport>> {
    let Some(smtp) = &config.smtp else {
        bail!("no smtp section in configuration");
    };
    let transport = SmtpTransport::from_settings(smtp).context("invalid smtp settings")?;
    Ok(OutboundService::new(db, Arc::clone(config), transport, dispatcher))
}

async fn read_payload(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut body = String::new();
        tokio::io::stdin()
            .read_to_string(&mut body)
            .await
            .context("failed to read stdin")?;
        Ok(body)
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("failed to read {file}"))
    }
}

fn print_report(report: &ProcessReport) {
    for (request, message) in &report.delivered {
        println!("delivered message {message} to request {request}");
    }
    for deferred in &report.deferred {
        println!("quarantined as deferred {deferred}");
    }
    if report.duplicates > 0 {
        println!("{} duplicate(s) skipped", report.duplicates);
    }
    if report.dropped > 0 {
        println!("{} recipient(s) dropped", report.dropped);
    }
}

/// Background work has no runner in the CLI; surface what was scheduled.
fn log_pending_tasks(tasks: &mut UnboundedReceiver<Task>) {
    while let Ok(task) = tasks.try_recv() {
        info!(?task, "task scheduled");
    }
}
