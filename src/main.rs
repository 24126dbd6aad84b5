//! Демонстрация broadcast-канала zcast.
//!
//! Поднимает внутрипроцессный брокер, подписывается на топик, публикует
//! несколько сообщений и печатает полученное вместе с числом вытесненных
//! сообщений.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::info;
use zcast::{
    init_logging, BroadcastChannel, ChannelOptions, LogFormat, MemoryBroker, Settings,
};

/// Аргументы командной строки.
#[derive(Parser)]
#[command(name = "zcast")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT"), ", built ", env!("BUILD_TIME"), ")"))]
#[command(about = "zcast - broadcast channel demo over an in-process pub/sub broker", long_about = None)]
struct Cli {
    /// Имя топика
    #[arg(short, long, default_value = "demo")]
    topic: String,
    /// Сколько сообщений опубликовать
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,
    /// Ёмкость очереди подписки (переопределяет ZCAST_SUBSCRIPTION__QUEUE_CAPACITY)
    #[arg(short, long)]
    capacity: Option<usize>,
    /// Режим: sharded / regular; по умолчанию определяется по версии сервера
    #[arg(long)]
    sharded: Option<bool>,
    /// Версия, которую сообщает брокер
    #[arg(long, default_value = "7.2.0", env = "ZCAST_SERVER_VERSION")]
    server_version: String,
    /// Формат логов: compact, pretty, json
    #[arg(long)]
    log_format: Option<LogFormat>,
    /// Сколько ждать каждое сообщение, мс
    #[arg(long, default_value_t = 500)]
    wait_ms: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load().context("failed to load settings")?;
    if let Some(capacity) = cli.capacity {
        settings.subscription.queue_capacity = capacity;
    }
    if cli.sharded.is_some() {
        settings.use_sharded_pubsub = cli.sharded;
    }
    if let Some(format) = cli.log_format {
        settings.log.format = format;
    }
    init_logging(&settings.log).context("failed to initialise logging")?;

    let broker = MemoryBroker::with_version(&cli.server_version);

    let channel = BroadcastChannel::with_options(
        Arc::new(broker.clone()),
        ChannelOptions::from_settings(&settings),
    )?;
    info!(mode = %channel.mode(), version = ?channel.server_version(), "channel ready");

    let topic = channel.topic(cli.topic.as_str());
    let subscription = topic.as_subscriber().subscribe();
    subscription.start()?;

    for i in 0..cli.count {
        topic
            .as_producer()
            .publish(Bytes::from(format!("message #{i}")))?;
    }

    let wait = Duration::from_millis(cli.wait_ms);
    let mut received = 0usize;
    while let Some(payload) = subscription.receive(Some(wait))? {
        received += 1;
        println!("{}: {}", topic.name(), String::from_utf8_lossy(&payload));
    }

    println!(
        "received {received} of {} message(s), dropped {}",
        cli.count,
        subscription.dropped_count()
    );
    subscription.close();
    Ok(())
}
