use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use modpilot::browser::manager::SessionOptions;
use modpilot::core::artifacts::{install_panic_hook, write_crash_dump};
use modpilot::core::config::{self, PilotConfig};
use modpilot::features::pacing::PacingStore;
use modpilot::features::scanner::ScanFilter;
use modpilot::features::vision::VisionClient;
use modpilot::tools::audit::AuditOptions;
use modpilot::tools::fanout::FanoutTargets;
use modpilot::tools::purge::PurgeOptions;
use modpilot::tools::scan::ScanOptions;
use modpilot::tools::{audit, compose, delete, fanout, purge, reply, scan, vision_debug};
use modpilot::tools::ActionExecutor;
use modpilot::{BrowserSession, ChannelRef, MessageRef, PageDriver, RunArtifacts};

const EXIT_ITEM_FAILED: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "modpilot", version, about = "Moderation automation for a logged-in chat web client")]
struct Cli {
    /// Show the browser window.
    #[arg(long, global = true)]
    headed: bool,

    /// Leave the browser open after the command finishes.
    #[arg(long, global = true)]
    keep_open: bool,

    /// Path to modpilot.json (overrides the default search).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the accessibility view of a channel.
    Audit {
        /// Channel URL; omitted → wait for manual navigation.
        url: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },
    /// List rendered messages of a channel (read-only).
    Scan {
        channel_pos: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Keep non-template messages too.
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 0)]
        scroll_up_steps: u32,
    },
    /// Delete one message by permalink.
    Delete {
        message_pos: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Reply to one message by permalink.
    Reply {
        message_pos: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Bulk-delete templated messages by author, round by round.
    Purge {
        channel_pos: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long, default_value_t = 5)]
        rounds: u32,
        #[arg(long, default_value_t = 3)]
        scroll_up_steps: u32,
        #[arg(long)]
        dry_run: bool,
    },
    /// Post one composed reply per author from a JSON list of {author, lang, themes}.
    Fanout {
        input: Option<PathBuf>,
        /// General (non-Chinese) channel URL.
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        zh_channel: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Drop reply mode and empty the composer.
    Clear {
        channel_pos: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Ask the vision model what it would do (advisory).
    Vision {
        url: Option<String>,
        #[arg(long)]
        goal: Option<String>,
        /// Execute a returned click/type.
        #[arg(long)]
        apply: bool,
    },
}

/// A fully validated command; building one never touches the browser.
#[derive(Debug)]
enum Job {
    Audit(AuditOptions),
    Scan {
        channel: ChannelRef,
        filter: ScanFilter,
        scroll_up_steps: u32,
    },
    Delete {
        message: MessageRef,
        dry_run: bool,
    },
    Reply {
        message: MessageRef,
        text: String,
        dry_run: bool,
    },
    Purge {
        opts: PurgeOptions,
        dry_run: bool,
    },
    Fanout {
        input: PathBuf,
        targets: FanoutTargets,
        dry_run: bool,
    },
    Clear {
        channel: ChannelRef,
        dry_run: bool,
    },
    Vision {
        url: Option<String>,
        goal: String,
        apply: bool,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::Audit(_) => "audit",
            Job::Scan { .. } => "scan",
            Job::Delete { .. } => "delete",
            Job::Reply { .. } => "reply",
            Job::Purge { .. } => "purge",
            Job::Fanout { .. } => "fanout",
            Job::Clear { .. } => "clear",
            Job::Vision { .. } => "vision",
        }
    }
}

fn is_snowflake(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_guild(s: &str) -> bool {
    s == "@me" || is_snowflake(s)
}

/// Permalink URL, or numeric `guild/channel/message` (guild may be `@me`).
fn parse_message(raw: &str) -> Option<MessageRef> {
    if let Some(m) = MessageRef::from_url(raw) {
        return Some(m);
    }
    let parts: Vec<&str> = raw.trim().trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [g, c, m] if is_guild(g) && is_snowflake(c) && is_snowflake(m) => Some(MessageRef {
            guild_id: g.to_string(),
            channel_id: c.to_string(),
            message_id: m.to_string(),
        }),
        _ => None,
    }
}

/// Channel URL, message permalink, or numeric `guild/channel`.
fn parse_channel(raw: &str) -> Option<ChannelRef> {
    if let Some(c) = ChannelRef::from_url(raw).or_else(|| ChannelRef::from_permalink(raw)) {
        return Some(c);
    }
    let parts: Vec<&str> = raw.trim().trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [g, c] if is_guild(g) && is_snowflake(c) => Some(ChannelRef {
            guild_id: g.to_string(),
            channel_id: c.to_string(),
        }),
        _ => None,
    }
}

fn required<T>(
    value: Option<String>,
    what: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, String> {
    let raw = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("missing {}", what))?;
    parse(&raw).ok_or_else(|| format!("invalid {}: {}", what, raw))
}

fn resolve_job(command: Command, cfg: &PilotConfig) -> Result<Job, String> {
    let origin = cfg.session.resolve_origin();
    Ok(match command {
        Command::Audit { url, channel } => {
            let url = url.or(channel).map(|u| match parse_channel(&u) {
                Some(c) if !u.contains("://") => c.url(&origin),
                _ => u,
            });
            Job::Audit(AuditOptions {
                url,
                login_wait: cfg.timing.login_wait(),
                ..Default::default()
            })
        }
        Command::Scan {
            channel_pos,
            channel,
            author,
            all,
            scroll_up_steps,
        } => Job::Scan {
            channel: required(channel.or(channel_pos), "channel (URL or guild/channel)", parse_channel)?,
            filter: ScanFilter {
                author_includes: author,
                classify: !all,
            },
            scroll_up_steps,
        },
        Command::Delete {
            message_pos,
            message,
            dry_run,
        } => Job::Delete {
            message: required(message.or(message_pos), "message permalink", parse_message)?,
            dry_run,
        },
        Command::Reply {
            message_pos,
            message,
            text,
            dry_run,
        } => Job::Reply {
            message: required(message.or(message_pos), "message permalink", parse_message)?,
            text: required(text, "--text", |t| Some(t.to_string()))?,
            dry_run,
        },
        Command::Purge {
            channel_pos,
            channel,
            author,
            rounds,
            scroll_up_steps,
            dry_run,
        } => Job::Purge {
            opts: PurgeOptions {
                channel: required(channel.or(channel_pos), "channel (URL or guild/channel)", parse_channel)?,
                author,
                rounds,
                scroll_up_steps,
            },
            dry_run,
        },
        Command::Fanout {
            input,
            channel,
            zh_channel,
            dry_run,
        } => {
            let input = input.ok_or_else(|| "missing input JSON file".to_string())?;
            let general = required(
                channel.or_else(|| cfg.fanout.general_channel.clone()),
                "--channel (general channel)",
                parse_channel,
            )?;
            let zh = required(
                zh_channel.or_else(|| cfg.fanout.zh_channel.clone()),
                "--zh-channel",
                parse_channel,
            )?;
            Job::Fanout {
                input,
                targets: FanoutTargets { zh, general },
                dry_run,
            }
        }
        Command::Clear {
            channel_pos,
            channel,
            dry_run,
        } => Job::Clear {
            channel: required(channel.or(channel_pos), "channel (URL or guild/channel)", parse_channel)?,
            dry_run,
        },
        Command::Vision { url, goal, apply } => Job::Vision {
            url,
            goal: required(goal, "--goal", |g| Some(g.to_string()))?,
            apply,
        },
    })
}

async fn execute(
    job: Job,
    driver: &dyn PageDriver,
    artifacts: &RunArtifacts,
    cfg: &PilotConfig,
    vision: &VisionClient,
) -> anyhow::Result<i32> {
    let origin = cfg.session.resolve_origin();
    let advisor = vision.is_configured().then_some(vision);
    let exec = |dry_run: bool| {
        ActionExecutor::new(driver, artifacts, cfg.timing.clone(), origin.clone())
            .dry_run(dry_run)
            .with_advisor(advisor)
    };
    let item_code = |failed: bool| if failed { EXIT_ITEM_FAILED } else { 0 };

    match job {
        Job::Audit(opts) => {
            let result = audit::audit(driver, artifacts, &opts).await?;
            Ok(item_code(!result.ok))
        }
        Job::Scan {
            channel,
            filter,
            scroll_up_steps,
        } => {
            let opts = ScanOptions {
                channel,
                origin: origin.clone(),
                filter,
                scroll_up_steps,
                attach_timeout: cfg.timing.attach_timeout(),
                settle: cfg.timing.settle(),
            };
            let found = scan::scan(driver, artifacts, &opts).await?;
            for m in &found {
                println!("{}\t{}\t{}", m.record.message_id, m.record.author, m.record.text);
            }
            Ok(0)
        }
        Job::Delete { message, dry_run } => {
            let report = delete::delete_message(&exec(dry_run), &message).await;
            artifacts.write_json("result.json", &report)?;
            Ok(item_code(!report.outcome.is_success()))
        }
        Job::Reply {
            message,
            text,
            dry_run,
        } => {
            let report = reply::reply_to_message(&exec(dry_run), &message, &text).await;
            artifacts.write_json("result.json", &report)?;
            Ok(item_code(!report.outcome.is_success()))
        }
        Job::Purge { opts, dry_run } => {
            let pacing = PacingStore::system();
            let report = purge::purge(&exec(dry_run), &opts, &pacing).await?;
            Ok(item_code(report.has_failures()))
        }
        Job::Fanout {
            input,
            targets,
            dry_run,
        } => {
            let items = fanout::load_input(&input)?;
            let pacing = PacingStore::system();
            let report =
                fanout::fanout(&exec(dry_run), &items, &targets, cfg.fanout.delay(), &pacing).await?;
            Ok(item_code(report.has_failures()))
        }
        Job::Clear { channel, dry_run } => {
            let report = compose::clear_composer(&exec(dry_run), &channel).await;
            artifacts.write_json("result.json", &report)?;
            Ok(item_code(!report.outcome.is_success()))
        }
        Job::Vision { url, goal, apply } => {
            let probe =
                vision_debug::probe(driver, artifacts, vision, url.as_deref(), &goal, apply).await?;
            Ok(item_code(probe.action.is_none()))
        }
    }
}

async fn run(cli: Cli, cfg: PilotConfig) -> anyhow::Result<i32> {
    let headed = cli.headed;
    let keep_open = cli.keep_open;

    let job = match resolve_job(cli.command, &cfg) {
        Ok(job) => job,
        Err(msg) => Cli::command()
            .error(ErrorKind::MissingRequiredArgument, msg)
            .exit(),
    };

    let artifacts = RunArtifacts::create(&cfg.resolve_artifacts_root(), job.name())?;
    let vision = VisionClient::new(cfg.vision.clone());
    let (width, height) = cfg.session.resolve_viewport();
    let session = BrowserSession::launch(SessionOptions {
        profile_dir: cfg.session.resolve_profile_dir(),
        headed,
        width,
        height,
    })
    .await?;

    let outcome = execute(job, session.driver(), &artifacts, &cfg, &vision).await;

    if keep_open {
        session.detach_until_closed().await;
    } else {
        session.close().await;
    }
    info!("artifacts written to {}", artifacts.dir().display());
    outcome
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => config::load_config_from(path).unwrap_or_else(|| {
            warn!("config {} not found, using defaults", path.display());
            PilotConfig::default()
        }),
        None => config::load_config(),
    };
    let artifacts_root = cfg.resolve_artifacts_root();
    install_panic_hook(artifacts_root.clone());

    match run(cli, cfg).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("modpilot failed: {:#}", e);
            if let Some(path) = write_crash_dump(&artifacts_root, &e) {
                error!("crash dump written to {}", path.display());
            }
            std::process::exit(1);
        }
    }
}
