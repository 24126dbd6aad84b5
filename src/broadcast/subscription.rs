use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, OnceLock,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use zcast_error::{BroadcastResult, SubscriptionClosedError, SubscriptionMode, TransportError};

use super::{
    mode::{DeliveryExt, PubSubMode},
    queue::{DropOldestQueue, Pop, PushOutcome},
};
use crate::{
    config::SubscriptionSettings,
    logging::log_error,
    transport::{PubSubClient, PubSubHandle},
};

/// Подписка на один топик.
///
/// Подписка ленивая: транспортный хэндл, команда SUBSCRIBE/SSUBSCRIBE и
/// фоновый поток-слушатель появляются только при первом чтении
/// (`receive`, `iter`) или явном `start()`. Слушатель забирает фреймы из
/// транспорта и складывает полезную нагрузку подходящих сообщений в
/// ограниченную очередь; при переполнении вытесняется самое старое
/// сообщение.
///
/// `close()` идемпотентен и безопасен из любого потока. `Drop` вызывает
/// `close()`.
pub struct Subscription {
    shared: Arc<Shared>,
    client: Arc<dyn PubSubClient>,
    requested: PubSubMode,
    settings: SubscriptionSettings,
    /// Слушатель; мьютекс также сериализует запуск подписки.
    listener: Mutex<Option<Listener>>,
}

/// Итератор по сообщениям подписки.
///
/// Каждый шаг блокируется до следующего сообщения; итерация завершается,
/// когда подписка закрыта.
#[derive(Debug)]
pub struct Messages<'a> {
    subscription: &'a Subscription,
}

/// Состояние, разделяемое с потоком-слушателем.
struct Shared {
    topic: String,
    queue: DropOldestQueue<Bytes>,
    handle: Mutex<Option<Box<dyn PubSubHandle>>>,
    closed: AtomicBool,
    started: AtomicBool,
    /// Хэндл был изъят из слота и закрыт.
    released: AtomicBool,
    /// Фактический режим, зафиксированный при запуске.
    mode: OnceLock<SubscriptionMode>,
}

struct Listener {
    handle: JoinHandle<()>,
    /// Отправитель живёт в потоке; разрыв канала означает его завершение.
    done: mpsc::Receiver<()>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Subscription {
    pub(crate) fn new(
        client: Arc<dyn PubSubClient>,
        topic: impl Into<String>,
        requested: PubSubMode,
        settings: SubscriptionSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                topic: topic.into(),
                queue: DropOldestQueue::new(settings.queue_capacity),
                handle: Mutex::new(None),
                closed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                released: AtomicBool::new(false),
                mode: OnceLock::new(),
            }),
            client,
            requested,
            settings,
            listener: Mutex::new(None),
        }
    }

    /// Запускает подписку, если она ещё не запущена.
    ///
    /// Создаёт транспортный хэндл, подписывает его на топик и запускает
    /// ровно один поток-слушатель. Повторные вызовы ничего не делают.
    ///
    /// # Возвращает
    /// - `Ok(())` если подписка запущена (сейчас или раньше)
    /// - `Err(SubscriptionClosed)` если подписка закрыта или её хэндл уже
    ///   освобождён
    /// - `Err(Transport)` если брокер отклонил подписку; подписку можно
    ///   запустить повторно
    pub fn start(&self) -> BroadcastResult<()> {
        self.ensure_startable()?;
        if self.shared.started.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut listener = self.listener.lock();
        self.ensure_startable()?;
        if self.shared.started.load(Ordering::Acquire) {
            return Ok(());
        }

        let topic = self.shared.topic.as_str();
        let mut handle = self.client.pubsub()?;
        let mode = match self.requested.subscribe(handle.as_mut(), topic) {
            Ok(mode) => mode,
            Err(err) => {
                if let Err(close_err) = handle.close() {
                    log_error(topic, &close_err, "failed to close pub/sub handle after subscribe error");
                }
                return Err(err.into());
            }
        };

        {
            let mut slot = self.shared.handle.lock();
            if self.shared.closed.load(Ordering::Acquire) {
                drop(slot);
                release_handle(handle, mode, topic);
                return Err(SubscriptionClosedError::closed(mode).into());
            }
            *slot = Some(handle);
        }
        let _ = self.shared.mode.set(mode);

        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let poll_interval = self.settings.poll_interval();
        let spawned = thread::Builder::new()
            .name(format!("zcast-listener:{topic}"))
            .spawn(move || listen(shared, mode, poll_interval, done_tx));

        match spawned {
            Ok(handle) => {
                *listener = Some(Listener {
                    handle,
                    done: done_rx,
                });
                self.shared.started.store(true, Ordering::Release);
                debug!(topic, %mode, "subscription started");
                Ok(())
            }
            Err(err) => {
                drop(listener);
                self.shared.started.store(true, Ordering::Release);
                self.close();
                Err(TransportError::from(err).into())
            }
        }
    }

    /// Ждёт следующее сообщение не дольше `timeout` (`None` — без
    /// ограничения). При необходимости запускает подписку.
    ///
    /// # Возвращает
    /// - `Ok(Some(payload))` полезная нагрузка очередного сообщения
    /// - `Ok(None)` если за `timeout` сообщений не было
    /// - `Err(SubscriptionClosed)` если подписка закрыта до или во время
    ///   ожидания
    pub fn receive(
        &self,
        timeout: Option<Duration>,
    ) -> BroadcastResult<Option<Bytes>> {
        self.start()?;
        match self.shared.queue.pop(timeout) {
            Pop::Item(payload) => Ok(Some(payload)),
            Pop::TimedOut => Ok(None),
            Pop::Closed => Err(self.closed_error().into()),
        }
    }

    /// Блокирующий итератор по сообщениям.
    ///
    /// Запускает подписку до возврата итератора, поэтому ошибка закрытой
    /// подписки или отказ брокера возвращаются сразу. Итерация
    /// заканчивается, когда подписку закрывают.
    pub fn iter(&self) -> BroadcastResult<Messages<'_>> {
        self.start()?;
        Ok(Messages { subscription: self })
    }

    /// Закрывает подписку. Никогда не завершается ошибкой; повторные
    /// вызовы ничего не делают.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let topic = self.shared.topic.as_str();

        // Будим читателей и освобождаем очередь.
        self.shared.queue.close();

        if let Some(handle) = self.shared.take_handle() {
            release_handle(handle, self.effective_mode(), topic);
        }

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.stop(self.settings.join_timeout(), topic);
        }

        debug!(
            topic,
            dropped = self.shared.queue.dropped(),
            "subscription closed"
        );
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Сколько сообщений вытеснено из-за переполнения очереди.
    pub fn dropped_count(&self) -> u64 {
        self.shared.queue.dropped()
    }

    /// Количество сообщений, ожидающих чтения.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Фактический режим подписки; `None` до запуска.
    pub fn mode(&self) -> Option<SubscriptionMode> {
        self.shared.mode.get().copied()
    }

    /// Жив ли поток-слушатель. После ошибки транспорта слушатель
    /// завершается, а подписка остаётся открытой, но молчит.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    fn ensure_startable(&self) -> Result<(), SubscriptionClosedError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if self.is_started() && self.shared.released.load(Ordering::Acquire) {
            return Err(SubscriptionClosedError::cleaned_up(self.effective_mode()));
        }
        Ok(())
    }

    fn effective_mode(&self) -> SubscriptionMode {
        self.mode().unwrap_or_else(|| self.requested.into())
    }

    fn closed_error(&self) -> SubscriptionClosedError {
        SubscriptionClosedError::closed(self.effective_mode())
    }
}

impl Shared {
    /// Кладёт полезную нагрузку в очередь. После закрытия ничего не делает.
    fn enqueue(
        &self,
        payload: Bytes,
    ) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.queue.push(payload) == PushOutcome::DroppedOldest {
            warn!(
                topic = %self.topic,
                dropped = self.queue.dropped(),
                "subscription queue is full, dropped oldest message"
            );
        }
    }

    /// Изымает хэндл из слота; после этого подписка считается очищенной.
    fn take_handle(&self) -> Option<Box<dyn PubSubHandle>> {
        let handle = self.handle.lock().take();
        if handle.is_some() {
            self.released.store(true, Ordering::Release);
        }
        handle
    }
}

impl Listener {
    /// Ждёт завершения потока не дольше `timeout`. Из самого потока-слушателя
    /// ожидание пропускается.
    fn stop(
        self,
        timeout: Duration,
        topic: &str,
    ) {
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        match self.done.recv_timeout(timeout) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(topic, ?timeout, "listener did not stop in time, detaching");
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!(topic, "listener thread panicked");
                }
            }
        }
    }
}

/// UNSUBSCRIBE/SUNSUBSCRIBE и закрытие хэндла; ошибки только логируются.
fn release_handle(
    mut handle: Box<dyn PubSubHandle>,
    mode: SubscriptionMode,
    topic: &str,
) {
    if let Err(err) = mode.unsubscribe(handle.as_mut(), topic) {
        log_error(topic, &err, "failed to unsubscribe during close");
    }
    if let Err(err) = handle.close() {
        log_error(topic, &err, "failed to close pub/sub handle");
    }
}

/// Цикл потока-слушателя.
fn listen(
    shared: Arc<Shared>,
    mode: SubscriptionMode,
    poll_interval: Duration,
    _done: mpsc::Sender<()>,
) {
    let tag = mode.data_tag();
    loop {
        if shared.closed.load(Ordering::Acquire) {
            break;
        }

        let next = {
            let mut slot = shared.handle.lock();
            match slot.as_mut() {
                Some(handle) => mode.next_frame(handle.as_mut(), poll_interval),
                None => break,
            }
        };

        match next {
            Ok(None) => continue,
            Ok(Some(frame)) => {
                if frame.kind == tag && frame.channel == shared.topic {
                    shared.enqueue(frame.data);
                } else {
                    trace!(
                        topic = %shared.topic,
                        kind = %frame.kind,
                        channel = %frame.channel,
                        "skipping frame"
                    );
                }
            }
            Err(err) => {
                if !shared.closed.load(Ordering::Acquire) {
                    log_error(&shared.topic, &err, "listener stopped after transport failure");
                }
                break;
            }
        }
    }
    trace!(topic = %shared.topic, "listener exited");
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Iterator for Messages<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.subscription.receive(None).ok().flatten()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.shared.topic)
            .field("requested", &self.requested)
            .field("mode", &self.mode())
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::Instant,
    };

    use zcast_error::{BroadcastChannelError, ClosedReason};

    use super::*;
    use crate::transport::{Frame, MemoryBroker, MemoryBrokerConfig};

    const WAIT: Option<Duration> = Some(Duration::from_secs(2));

    fn settings(capacity: usize) -> SubscriptionSettings {
        SubscriptionSettings {
            queue_capacity: capacity,
            poll_interval_ms: 10,
            join_timeout_ms: 1000,
        }
    }

    fn subscription(
        broker: &MemoryBroker,
        topic: &str,
        mode: PubSubMode,
    ) -> Subscription {
        Subscription::new(Arc::new(broker.clone()), topic, mode, settings(8))
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    /// Клиент, у которого следующее создание хэндла завершается таймаутом.
    struct Flaky {
        inner: MemoryBroker,
        fail_next: AtomicBool,
    }

    impl PubSubClient for Flaky {
        fn publish(
            &self,
            channel: &str,
            payload: Bytes,
        ) -> Result<usize, TransportError> {
            self.inner.publish(channel, payload)
        }

        fn spublish(
            &self,
            channel: &str,
            payload: Bytes,
        ) -> Result<usize, TransportError> {
            self.inner.spublish(channel, payload)
        }

        fn pubsub(&self) -> Result<Box<dyn PubSubHandle>, TransportError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(TransportError::Timeout);
            }
            self.inner.pubsub()
        }

        fn server_version(&self) -> Result<String, TransportError> {
            self.inner.server_version()
        }
    }

    /// Тест проверяет, что создание подписки не обращается к брокеру.
    #[test]
    fn test_lazy_start() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);

        assert_eq!(broker.pubsub_calls(), 0);
        assert!(!sub.is_started());
        assert!(!sub.is_listening());
        assert_eq!(sub.mode(), None);

        sub.start().unwrap();
        assert_eq!(broker.pubsub_calls(), 1);
        assert_eq!(broker.subscriber_count("t1"), 1);
        assert!(sub.is_started());
        assert!(sub.is_listening());
        assert_eq!(sub.mode(), Some(SubscriptionMode::Standard));
    }

    /// Тест проверяет, что повторный запуск не создаёт второй хэндл и не
    /// подписывается повторно.
    #[test]
    fn test_start_is_idempotent() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.start().unwrap();
        sub.start().unwrap();
        assert_eq!(sub.receive(Some(Duration::from_millis(10))).unwrap(), None);

        assert_eq!(broker.pubsub_calls(), 1);
        assert_eq!(broker.handle_stats()[0].subscribe_calls(), 1);
    }

    /// Тест проверяет запуск закрытой подписки.
    #[test]
    fn test_start_when_closed() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.close();

        let err = sub.start().unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "The pub/sub subscription is closed");
        assert_eq!(broker.pubsub_calls(), 0);
    }

    /// Тест проверяет запуск подписки, чей хэндл уже освобождён.
    #[test]
    fn test_start_when_cleaned_up() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.start().unwrap();

        let handle = sub.shared.take_handle();
        assert!(handle.is_some());

        match sub.start() {
            Err(BroadcastChannelError::SubscriptionClosed(err)) => {
                assert_eq!(err.reason, ClosedReason::CleanedUp);
                assert_eq!(err.to_string(), "The pub/sub subscription has been cleaned up");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(wait_until(|| !sub.is_listening()));
    }

    /// Тест проверяет, что многократный `close()` отписывается и закрывает
    /// хэндл ровно один раз.
    #[test]
    fn test_close_idempotent() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.start().unwrap();

        for _ in 0..3 {
            sub.close();
        }

        let stats = &broker.handle_stats()[0];
        assert_eq!(stats.unsubscribe_calls(), 1);
        assert_eq!(stats.close_calls(), 1);
        assert_eq!(broker.subscriber_count("t1"), 0);
        assert!(!sub.is_listening());
        assert!(sub.is_closed());
    }

    /// Тест проверяет закрытие незапущенной подписки: без работы с
    /// транспортом.
    #[test]
    fn test_close_before_start() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.close();
        assert_eq!(broker.pubsub_calls(), 0);
        assert!(broker.handle_stats().is_empty());
    }

    /// Тест проверяет получение опубликованного сообщения.
    #[test]
    fn test_receive_published_message() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.start().unwrap();

        broker.publish("t1", Bytes::from_static(b"hello")).unwrap();
        assert_eq!(sub.receive(WAIT).unwrap(), Some(Bytes::from_static(b"hello")));
    }

    /// Тест проверяет таймаут при отсутствии сообщений.
    #[test]
    fn test_receive_timeout() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        assert_eq!(sub.receive(Some(Duration::from_millis(10))).unwrap(), None);
    }

    /// Тест проверяет, что слушатель пропускает подтверждения подписки,
    /// чужие каналы и фреймы другого режима.
    #[test]
    fn test_listener_filters_frames() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.start().unwrap();

        broker.inject(Frame::new("subscribe", "t1", Bytes::from_static(b"1")));
        broker.inject(Frame::message("wrong-topic", Bytes::from_static(b"x")));
        broker.inject(Frame::sharded_message("t1", Bytes::from_static(b"y")));
        broker.inject(Frame::new("pmessage", "t1", Bytes::from_static(b"z")));
        broker.inject(Frame::message("t1", Bytes::from_static(b"ok")));

        assert_eq!(sub.receive(WAIT).unwrap(), Some(Bytes::from_static(b"ok")));
        assert_eq!(sub.pending(), 0);
    }

    /// Тест проверяет, что шардированная подписка принимает только
    /// `smessage`.
    #[test]
    fn test_sharded_listener_accepts_smessage() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Sharded);
        sub.start().unwrap();
        assert_eq!(sub.mode(), Some(SubscriptionMode::Sharded));

        broker.inject(Frame::message("t1", Bytes::from_static(b"regular")));
        broker.spublish("t1", Bytes::from_static(b"sharded")).unwrap();

        assert_eq!(sub.receive(WAIT).unwrap(), Some(Bytes::from_static(b"sharded")));
        sub.close();
        assert_eq!(broker.handle_stats()[0].sunsubscribe_calls(), 1);
    }

    /// Тест проверяет откат SSUBSCRIBE -> SUBSCRIBE и UNSUBSCRIBE при
    /// закрытии.
    #[test]
    fn test_sharded_fallback_mode() {
        let broker = MemoryBroker::with_config(MemoryBrokerConfig {
            version: Some("6.2.0".to_string()),
            sharded_commands: false,
        });
        let sub = subscription(&broker, "t1", PubSubMode::Sharded);
        sub.start().unwrap();
        assert_eq!(sub.mode(), Some(SubscriptionMode::Standard));

        broker.publish("t1", Bytes::from_static(b"fallback")).unwrap();
        assert_eq!(sub.receive(WAIT).unwrap(), Some(Bytes::from_static(b"fallback")));

        sub.close();
        let stats = &broker.handle_stats()[0];
        assert_eq!(stats.unsubscribe_calls(), 1);
        assert_eq!(stats.sunsubscribe_calls(), 0);
    }

    /// Тест проверяет вытеснение самого старого сообщения при переполнении.
    #[test]
    fn test_enqueue_drops_oldest() {
        let broker = MemoryBroker::new();
        let sub = Subscription::new(
            Arc::new(broker.clone()),
            "t1",
            PubSubMode::Regular,
            settings(3),
        );

        for i in 0..4u8 {
            sub.shared.enqueue(Bytes::from(vec![i]));
        }
        assert_eq!(sub.dropped_count(), 1);
        assert_eq!(sub.pending(), 3);

        let got: Vec<Bytes> = (0..3)
            .map(|_| sub.receive(Some(Duration::ZERO)).unwrap().unwrap())
            .collect();
        assert!(!got.contains(&Bytes::from(vec![0])));
        assert!(got.contains(&Bytes::from(vec![3])));
    }

    /// Тест проверяет, что после закрытия сообщения не принимаются.
    #[test]
    fn test_enqueue_when_closed() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.close();
        sub.shared.enqueue(Bytes::from_static(b"late"));
        assert_eq!(sub.pending(), 0);
    }

    /// Тест проверяет одновременное закрытие и запись 50 сообщений.
    #[test]
    fn test_concurrent_close_and_enqueue() {
        let broker = MemoryBroker::new();
        let sub = Arc::new(subscription(&broker, "t1", PubSubMode::Regular));
        sub.start().unwrap();
        let enqueued = Arc::new(AtomicUsize::new(0));

        let writer = {
            let shared = Arc::clone(&sub.shared);
            let enqueued = Arc::clone(&enqueued);
            thread::spawn(move || {
                for i in 0..50 {
                    shared.enqueue(Bytes::from(format!("msg_{i}")));
                    enqueued.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        let closer = {
            let sub = Arc::clone(&sub);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                sub.close();
            })
        };

        writer.join().unwrap();
        closer.join().unwrap();

        assert_eq!(enqueued.load(Ordering::Relaxed), 50);
        assert!(sub.is_closed());
        assert_eq!(sub.pending(), 0);
    }

    /// Тест проверяет, что ошибка транспорта останавливает слушателя, а
    /// подписка остаётся открытой и просто молчит.
    #[test]
    fn test_listener_dies_on_transport_error() {
        let broker = MemoryBroker::new();
        let sub = subscription(&broker, "t1", PubSubMode::Regular);
        sub.start().unwrap();

        broker.inject_error(TransportError::Protocol {
            reason: "connection reset by peer".to_string(),
        });
        assert!(wait_until(|| !sub.is_listening()));

        broker.publish("t1", Bytes::from_static(b"lost")).unwrap();
        assert_eq!(sub.receive(Some(Duration::from_millis(20))).unwrap(), None);
        assert!(!sub.is_closed());

        sub.close();
        assert_eq!(broker.handle_stats()[0].close_calls(), 1);
    }

    /// Тест проверяет, что `close()` будит читателя, ждущего без таймаута.
    #[test]
    fn test_close_wakes_blocked_receive() {
        let broker = MemoryBroker::new();
        let sub = Arc::new(subscription(&broker, "t1", PubSubMode::Regular));
        sub.start().unwrap();

        let reader = {
            let sub = Arc::clone(&sub);
            thread::spawn(move || sub.receive(None))
        };
        thread::sleep(Duration::from_millis(30));
        sub.close();

        let res = reader.join().unwrap();
        assert!(matches!(res, Err(ref e) if e.is_closed()), "got {res:?}");
    }

    /// Тест проверяет итератор: сообщения в порядке публикации, завершение
    /// после закрытия и ошибку на закрытой подписке.
    #[test]
    fn test_iterator() {
        let broker = MemoryBroker::new();
        let sub = Arc::new(subscription(&broker, "t1", PubSubMode::Regular));
        sub.start().unwrap();
        for p in ["a", "b", "c"] {
            broker.publish("t1", Bytes::from(p)).unwrap();
        }

        let got: Vec<Bytes> = sub.iter().unwrap().take(3).collect();
        assert_eq!(
            got,
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
            ]
        );

        let closer = {
            let sub = Arc::clone(&sub);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                sub.close();
            })
        };
        assert_eq!(sub.iter().unwrap().next(), None);
        closer.join().unwrap();

        assert!(sub.iter().is_err());
    }

    /// Тест проверяет, что ошибка подписки на брокере оставляет подписку
    /// пригодной для повторного запуска.
    #[test]
    fn test_start_failure_is_retryable() {
        let broker = MemoryBroker::new();
        let client = Arc::new(Flaky {
            inner: broker.clone(),
            fail_next: AtomicBool::new(true),
        });
        let sub = Subscription::new(client, "t1", PubSubMode::Regular, settings(8));

        let err = sub.start().unwrap_err();
        assert!(matches!(
            err,
            BroadcastChannelError::Transport(TransportError::Timeout)
        ));
        assert!(!sub.is_started());

        sub.start().unwrap();
        assert!(sub.is_started());
        assert_eq!(broker.subscriber_count("t1"), 1);
    }

    /// Тест проверяет, что `iter()` запускает подписку и возвращает отказ
    /// брокера, а не пустой итератор.
    #[test]
    fn test_iter_surfaces_start_failure() {
        let broker = MemoryBroker::new();
        let client = Arc::new(Flaky {
            inner: broker.clone(),
            fail_next: AtomicBool::new(true),
        });
        let sub = Subscription::new(client, "t1", PubSubMode::Regular, settings(8));

        let err = sub.iter().unwrap_err();
        assert!(matches!(
            err,
            BroadcastChannelError::Transport(TransportError::Timeout)
        ));
        assert!(!sub.is_started());
        assert!(!sub.is_closed());

        let mut messages = sub.iter().unwrap();
        assert!(sub.is_started());
        broker.publish("t1", Bytes::from_static(b"after retry")).unwrap();
        assert_eq!(messages.next(), Some(Bytes::from_static(b"after retry")));
    }

    /// Тест проверяет, что drop подписки освобождает ресурсы брокера.
    #[test]
    fn test_drop_closes() {
        let broker = MemoryBroker::new();
        {
            let sub = subscription(&broker, "t1", PubSubMode::Regular);
            sub.start().unwrap();
        }
        assert_eq!(broker.subscriber_count("t1"), 0);
        assert_eq!(broker.handle_stats()[0].close_calls(), 1);
    }
}
