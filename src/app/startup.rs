//! Binary entry point: arguments, configuration, logging, then serve or check

use super::cli::{Args, Command, ConfigError, FanoutConfig, LoggingSection};
use crate::broker::Broker;
use crate::core::error_handling::log_error_with_context;
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::version;
use crate::notifications::{EventFilter, EventKind, EventReceiver};
use crate::server::Server;
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;

/// Run the application and return the process exit code
pub async fn startup() -> i32 {
    let args = Args::parse();
    let use_color = args.use_color();

    let loaded = load_config(&args).await;
    let logging = match &loaded {
        Ok(config) => config.logging.clone(),
        Err(_) => LoggingSection {
            level: args.log_level.clone(),
            format: args.log_format.clone(),
            file: args.log_file.clone(),
        },
    };
    if let Err(e) = start_logging(&logging, use_color) {
        eprintln!("Failed to initialise logging: {}", e);
        return 1;
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log_error_with_context(&e, "Loading configuration");
            return 1;
        }
    };

    log::info!("fanout {}", version::long_version());

    let broker = Arc::new(Broker::new());
    if let Err(e) = broker.provision(&config.broker) {
        log_error_with_context(&e, "Provisioning configured queues and topics");
        return 1;
    }

    match args.selected_command() {
        Command::Check => {
            print_topology(&broker, use_color);
            0
        }
        Command::Serve => serve(broker, &config).await,
    }
}

async fn load_config(args: &Args) -> Result<FanoutConfig, ConfigError> {
    let mut config = FanoutConfig::load(args.config_file.as_deref()).await?;
    config.apply_args(args);
    config.validate()?;
    Ok(config)
}

fn start_logging(
    logging: &LoggingSection,
    use_color: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = logging.file.as_ref().map(|f| f.to_string_lossy().into_owned());
    // Colour escapes never go into a log file
    let use_color = use_color && file.is_none();
    init_logging(
        logging.level.as_deref(),
        logging.format.as_deref(),
        file.as_deref(),
        use_color,
    )
}

async fn serve(broker: Arc<Broker>, config: &FanoutConfig) -> i32 {
    let audit = broker.events().subscribe(
        "audit-log",
        EventFilter::Kinds(vec![EventKind::Delivery, EventKind::Lifecycle]),
        "startup",
    );
    let audit_task = tokio::spawn(log_events(audit));

    let server = Server::new(Arc::clone(&broker), config.server_settings());
    let result = ShutdownCoordinator::guard(|shutdown| server.serve(shutdown)).await;
    audit_task.abort();

    match result {
        Ok(()) => 0,
        Err(e) => {
            log::error!("FATAL: Server on {} failed: {}", config.server.listen_addr, e);
            1
        }
    }
}

async fn log_events(mut events: EventReceiver) {
    while let Some(notification) = events.recv().await {
        log::debug!("event: {:?}", notification.event);
    }
}

fn print_topology(broker: &Broker, use_color: bool) {
    let heading = |text: &str| {
        if use_color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    };

    println!("{}", heading("Queues"));
    match broker.queue_summaries() {
        Ok(queues) if queues.is_empty() => println!("  (none)"),
        Ok(queues) => {
            for queue in queues {
                let redrive = match (&queue.redrive_target, queue.max_receive_count) {
                    (Some(target), Some(max)) => format!(", redrive to {} after {}", target, max),
                    _ => String::new(),
                };
                let depth = queue
                    .max_depth
                    .map(|d| format!(", max depth {}", d))
                    .unwrap_or_default();
                println!(
                    "  {} (visibility {}s{}{})",
                    queue.name, queue.visibility_timeout_seconds, redrive, depth
                );
            }
        }
        Err(e) => log_error_with_context(&e, "Listing queues"),
    }

    println!("{}", heading("Topics"));
    match broker.topic_summaries() {
        Ok(topics) if topics.is_empty() => println!("  (none)"),
        Ok(topics) => {
            for topic in topics {
                let queues: Vec<&str> = topic
                    .subscriptions
                    .iter()
                    .map(|s| s.queue.as_str())
                    .collect();
                println!("  {} -> [{}]", topic.name, queues.join(", "));
            }
        }
        Err(e) => log_error_with_context(&e, "Listing topics"),
    }
}
