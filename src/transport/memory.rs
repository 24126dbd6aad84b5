use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use zcast_error::TransportError;

use super::{Frame, PubSubClient, PubSubHandle, MESSAGE, SHARDED_MESSAGE};
use crate::broadcast::parse_server_version;

/// Сколько счётчиков закрытых хэндлов брокер хранит для инспекции.
const RELEASED_STATS_KEPT: usize = 64;

/// Настройки внутрипроцессного брокера.
#[derive(Debug, Clone)]
pub struct MemoryBrokerConfig {
    /// Версия, которую брокер сообщает клиентам. `None` — версия недоступна.
    pub version: Option<String>,
    /// Поддерживает ли брокер SPUBLISH/SSUBSCRIBE/SUNSUBSCRIBE.
    pub sharded_commands: bool,
}

/// Внутрипроцессный pub/sub брокер.
///
/// Ведёт два независимых пространства каналов (обычное и шардированное),
/// доставляет фреймы во входящие очереди хэндлов и присылает подтверждения
/// подписки так же, как это делает Redis. Клон `MemoryBroker` указывает на
/// тот же брокер.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

/// Счётчики вызовов одного хэндла подписки.
#[derive(Debug, Default)]
pub struct HandleStats {
    subscribe: AtomicUsize,
    ssubscribe: AtomicUsize,
    unsubscribe: AtomicUsize,
    sunsubscribe: AtomicUsize,
    close: AtomicUsize,
    receive: AtomicUsize,
    released: AtomicBool,
}

struct BrokerInner {
    config: MemoryBrokerConfig,
    /// Обычные каналы → зарегистрированные хэндлы
    channels: DashMap<String, Vec<Registration>>,
    /// Шардированные каналы → зарегистрированные хэндлы
    shard_channels: DashMap<String, Vec<Registration>>,
    /// Входящие очереди открытых хэндлов (для служебных инъекций)
    inboxes: Mutex<Vec<Weak<Inbox>>>,
    /// Счётчики открытых хэндлов и последних `RELEASED_STATS_KEPT` закрытых
    stats: Mutex<Vec<Arc<HandleStats>>>,
    next_id: AtomicU64,
    pubsub_calls: AtomicUsize,
    version_calls: AtomicUsize,
}

#[derive(Clone)]
struct Registration {
    id: u64,
    inbox: Arc<Inbox>,
}

/// Входящая очередь одного хэндла.
#[derive(Default)]
struct Inbox {
    queue: Mutex<VecDeque<Result<Frame, TransportError>>>,
    ready: Condvar,
    closed: AtomicBool,
}

/// Хэндл подписки внутрипроцессного брокера.
struct MemoryPubSub {
    id: u64,
    broker: Arc<BrokerInner>,
    inbox: Arc<Inbox>,
    channels: HashSet<String>,
    shard_channels: HashSet<String>,
    stats: Arc<HandleStats>,
    closed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryBroker {
    /// Брокер с версией `7.2.0` и поддержкой шардированных команд.
    pub fn new() -> Self {
        Self::with_config(MemoryBrokerConfig::default())
    }

    pub fn with_config(config: MemoryBrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                channels: DashMap::new(),
                shard_channels: DashMap::new(),
                inboxes: Mutex::new(Vec::new()),
                stats: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                pubsub_calls: AtomicUsize::new(0),
                version_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Брокер, который сообщает версию `version` и отклоняет шардированные
    /// команды, если версия ниже 7.0.0.
    pub fn with_version(version: &str) -> Self {
        Self::with_config(MemoryBrokerConfig {
            version: Some(version.to_string()),
            sharded_commands: parse_server_version(version).supports_sharded_pubsub(),
        })
    }

    /// Счётчики хэндлов в порядке их создания.
    ///
    /// Открытые хэндлы присутствуют всегда; из закрытых хранятся только
    /// последние `RELEASED_STATS_KEPT`.
    pub fn handle_stats(&self) -> Vec<Arc<HandleStats>> {
        self.inner.stats.lock().clone()
    }

    /// Сколько раз клиент создавал хэндл подписки.
    pub fn pubsub_calls(&self) -> usize {
        self.inner.pubsub_calls.load(Ordering::Relaxed)
    }

    /// Сколько раз запрашивалась версия сервера.
    pub fn server_version_calls(&self) -> usize {
        self.inner.version_calls.load(Ordering::Relaxed)
    }

    /// Количество хэндлов, подписанных на обычный канал.
    pub fn subscriber_count(
        &self,
        channel: &str,
    ) -> usize {
        self.inner.channels.get(channel).map_or(0, |r| r.len())
    }

    /// Количество хэндлов, подписанных на шардированный канал.
    pub fn shard_subscriber_count(
        &self,
        channel: &str,
    ) -> usize {
        self.inner.shard_channels.get(channel).map_or(0, |r| r.len())
    }

    /// Кладёт сырой фрейм во входящие очереди всех открытых хэндлов,
    /// независимо от их подписок.
    pub fn inject(
        &self,
        frame: Frame,
    ) {
        for inbox in self.inner.live_inboxes() {
            inbox.push(Ok(frame.clone()));
        }
    }

    /// Следующее получение на каждом открытом хэндле завершится ошибкой.
    pub fn inject_error(
        &self,
        err: TransportError,
    ) {
        for inbox in self.inner.live_inboxes() {
            inbox.push(Err(err.clone()));
        }
    }
}

impl BrokerInner {
    /// Забывает входящую очередь закрытого хэндла и вытесняет самые старые
    /// счётчики закрытых хэндлов сверх лимита.
    fn forget_handle(
        &self,
        inbox: &Arc<Inbox>,
    ) {
        self.inboxes
            .lock()
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), Arc::as_ptr(inbox)));

        let mut stats = self.stats.lock();
        let released = stats
            .iter()
            .filter(|s| s.released.load(Ordering::Acquire))
            .count();
        let mut excess = released.saturating_sub(RELEASED_STATS_KEPT);
        stats.retain(|s| {
            if excess > 0 && s.released.load(Ordering::Acquire) {
                excess -= 1;
                return false;
            }
            true
        });
    }

    fn live_inboxes(&self) -> Vec<Arc<Inbox>> {
        let mut inboxes = self.inboxes.lock();
        inboxes.retain(|w| w.strong_count() > 0);
        inboxes
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|i| !i.closed.load(Ordering::Acquire))
            .collect()
    }

    fn deliver(
        map: &DashMap<String, Vec<Registration>>,
        kind: &str,
        channel: &str,
        payload: Bytes,
    ) -> usize {
        // Копируем список, чтобы не держать шард DashMap во время доставки.
        let targets = match map.get(channel) {
            Some(regs) => regs.clone(),
            None => return 0,
        };
        for reg in &targets {
            reg.inbox
                .push(Ok(Frame::new(kind, channel, payload.clone())));
        }
        targets.len()
    }

    fn register(
        map: &DashMap<String, Vec<Registration>>,
        channel: &str,
        reg: Registration,
    ) {
        let mut regs = map.entry(channel.to_string()).or_default();
        if !regs.iter().any(|r| r.id == reg.id) {
            regs.push(reg);
        }
    }

    fn deregister(
        map: &DashMap<String, Vec<Registration>>,
        channel: &str,
        id: u64,
    ) {
        if let Some(mut regs) = map.get_mut(channel) {
            regs.retain(|r| r.id != id);
        }
        map.remove_if(channel, |_, regs| regs.is_empty());
    }
}

impl Inbox {
    fn push(
        &self,
        item: Result<Frame, TransportError>,
    ) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.queue.lock().push_back(item);
        self.ready.notify_one();
    }

    fn pop(
        &self,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.queue.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::ConnectionClosed);
            }
            if let Some(item) = queue.pop_front() {
                return item.map(Some);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut queue, deadline).timed_out() {
                        return match queue.pop_front() {
                            Some(item) => item.map(Some),
                            None => Ok(None),
                        };
                    }
                }
                None => self.ready.wait(&mut queue),
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue.lock().clear();
        self.ready.notify_all();
    }
}

impl HandleStats {
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe.load(Ordering::Relaxed)
    }

    pub fn ssubscribe_calls(&self) -> usize {
        self.ssubscribe.load(Ordering::Relaxed)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe.load(Ordering::Relaxed)
    }

    pub fn sunsubscribe_calls(&self) -> usize {
        self.sunsubscribe.load(Ordering::Relaxed)
    }

    pub fn close_calls(&self) -> usize {
        self.close.load(Ordering::Relaxed)
    }

    pub fn receive_calls(&self) -> usize {
        self.receive.load(Ordering::Relaxed)
    }
}

impl MemoryPubSub {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }

    fn ensure_sharded(
        &self,
        command: &str,
    ) -> Result<(), TransportError> {
        if !self.broker.config.sharded_commands {
            return Err(TransportError::UnknownCommand {
                command: command.to_string(),
            });
        }
        Ok(())
    }

    fn subscription_count(&self) -> Bytes {
        Bytes::from((self.channels.len() + self.shard_channels.len()).to_string())
    }

    fn release(&mut self) {
        for channel in self.channels.drain() {
            BrokerInner::deregister(&self.broker.channels, &channel, self.id);
        }
        for channel in self.shard_channels.drain() {
            BrokerInner::deregister(&self.broker.shard_channels, &channel, self.id);
        }
        self.inbox.close();
        self.closed = true;
        self.stats.released.store(true, Ordering::Release);
        self.broker.forget_handle(&self.inbox);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация трейтов транспорта
////////////////////////////////////////////////////////////////////////////////

impl PubSubClient for MemoryBroker {
    fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, TransportError> {
        Ok(BrokerInner::deliver(
            &self.inner.channels,
            MESSAGE,
            channel,
            payload,
        ))
    }

    fn spublish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, TransportError> {
        if !self.inner.config.sharded_commands {
            return Err(TransportError::UnknownCommand {
                command: "SPUBLISH".to_string(),
            });
        }
        Ok(BrokerInner::deliver(
            &self.inner.shard_channels,
            SHARDED_MESSAGE,
            channel,
            payload,
        ))
    }

    fn pubsub(&self) -> Result<Box<dyn PubSubHandle>, TransportError> {
        self.inner.pubsub_calls.fetch_add(1, Ordering::Relaxed);

        let inbox = Arc::new(Inbox::default());
        let stats = Arc::new(HandleStats::default());
        self.inner.inboxes.lock().push(Arc::downgrade(&inbox));
        self.inner.stats.lock().push(Arc::clone(&stats));

        Ok(Box::new(MemoryPubSub {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            broker: Arc::clone(&self.inner),
            inbox,
            channels: HashSet::new(),
            shard_channels: HashSet::new(),
            stats,
            closed: false,
        }))
    }

    fn server_version(&self) -> Result<String, TransportError> {
        self.inner.version_calls.fetch_add(1, Ordering::Relaxed);
        self.inner
            .config
            .version
            .clone()
            .ok_or_else(|| TransportError::Protocol {
                reason: "server did not report redis_version".to_string(),
            })
    }
}

impl PubSubHandle for MemoryPubSub {
    fn subscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError> {
        self.stats.subscribe.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;

        let reg = Registration {
            id: self.id,
            inbox: Arc::clone(&self.inbox),
        };
        BrokerInner::register(&self.broker.channels, channel, reg);
        self.channels.insert(channel.to_string());
        self.inbox.push(Ok(Frame::new(
            "subscribe",
            channel,
            self.subscription_count(),
        )));
        Ok(())
    }

    fn ssubscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError> {
        self.stats.ssubscribe.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;
        self.ensure_sharded("SSUBSCRIBE")?;

        let reg = Registration {
            id: self.id,
            inbox: Arc::clone(&self.inbox),
        };
        BrokerInner::register(&self.broker.shard_channels, channel, reg);
        self.shard_channels.insert(channel.to_string());
        self.inbox.push(Ok(Frame::new(
            "ssubscribe",
            channel,
            self.subscription_count(),
        )));
        Ok(())
    }

    fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError> {
        self.stats.unsubscribe.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;

        BrokerInner::deregister(&self.broker.channels, channel, self.id);
        self.channels.remove(channel);
        self.inbox.push(Ok(Frame::new(
            "unsubscribe",
            channel,
            self.subscription_count(),
        )));
        Ok(())
    }

    fn sunsubscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError> {
        self.stats.sunsubscribe.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;
        self.ensure_sharded("SUNSUBSCRIBE")?;

        BrokerInner::deregister(&self.broker.shard_channels, channel, self.id);
        self.shard_channels.remove(channel);
        self.inbox.push(Ok(Frame::new(
            "sunsubscribe",
            channel,
            self.subscription_count(),
        )));
        Ok(())
    }

    fn get_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError> {
        self.stats.receive.fetch_add(1, Ordering::Relaxed);
        self.ensure_open()?;
        self.inbox.pop(timeout)
    }

    fn get_sharded_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError> {
        self.get_message(timeout)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stats.close.fetch_add(1, Ordering::Relaxed);
        if !self.closed {
            self.release();
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            version: Some("7.2.0".to_string()),
            sharded_commands: true,
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("config", &self.inner.config)
            .field("channels", &self.inner.channels.len())
            .field("shard_channels", &self.inner.shard_channels.len())
            .finish()
    }
}

impl Drop for MemoryPubSub {
    fn drop(&mut self) {
        if !self.closed {
            self.release();
        }
    }
}
