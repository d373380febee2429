/*!
Harness de test avec broker embarqué

Pour chaque exécution :
- démarre un broker sur l'adresse configurée et attend qu'il soit prêt
- construit un `MessagingClient<T>` avec un converter basé sur le marshaller fourni
- exécute le callback avec le broker et le client
- arrête le connecteur puis le broker, quelle que soit l'issue du callback

Les échecs d'assertion (panic ou `AssertionFailed`) remontent au test ;
les autres erreurs sont journalisées puis absorbées (voir `policy`).
*/

use crate::client::{ConnectionFactory, MessagingClient};
use crate::config::HarnessConfig;
use crate::converter::MarshallingMessageConverter;
use crate::logger::{HarnessLogger, LogFacade};
use crate::marshaller::Marshaller;
use crate::policy::{AssertionFailed, AssertionsOnly, CallbackFailure, Disposition, ErrorPolicy};
use futures::FutureExt;
use relais_broker::{BrokerError, BrokerService, BrokerState, TransportConnector};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("the broker callback can not be null")]
    MissingCallback,
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("Broker did not start within {0:?}")]
    StartupTimeout(Duration),
    #[error("Broker failed to start: {0}")]
    BrokerFailed(String),
    #[error("Broker started without a bound connector")]
    NotBound,
    #[error(transparent)]
    Client(#[from] crate::client::ClientError),
    #[error(transparent)]
    Assertion(#[from] AssertionFailed),
    #[error("Broker callback failed: {0:#}")]
    Callback(anyhow::Error),
}

/// Logique de test exécutée pendant que le broker tourne
pub trait BrokerCallback<T> {
    type Future: Future<Output = anyhow::Result<()>>;

    fn with_broker(self, broker: BrokerService, client: MessagingClient<T>) -> Self::Future;
}

impl<T, F, Fut> BrokerCallback<T> for F
where
    F: FnOnce(BrokerService, MessagingClient<T>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    type Future = Fut;

    fn with_broker(self, broker: BrokerService, client: MessagingClient<T>) -> Self::Future {
        self(broker, client)
    }
}

/// Type de callback à utiliser avec `run(.., None)`
pub type NoCallback<T> = fn(BrokerService, MessagingClient<T>) -> std::future::Ready<anyhow::Result<()>>;

pub struct BrokerTestHarness {
    config: HarnessConfig,
    logger: Arc<dyn HarnessLogger>,
    policy: Arc<dyn ErrorPolicy>,
}

impl BrokerTestHarness {
    pub fn new(config: HarnessConfig) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        Self {
            config,
            logger: Arc::new(LogFacade),
            policy: Arc::new(AssertionsOnly),
        }
    }

    pub fn with_logger<L: HarnessLogger + 'static>(mut self, logger: L) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    pub fn with_policy<P: ErrorPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Variante pour closures : `run(marshaller, Some(callback))`
    pub async fn run_with<T, M, F, Fut>(&self, marshaller: M, callback: F) -> Result<(), HarnessError>
    where
        T: 'static,
        M: Marshaller<T> + 'static,
        F: FnOnce(BrokerService, MessagingClient<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.run(marshaller, Some(callback)).await
    }

    /// Démarre le broker, exécute le callback, arrête le broker.
    ///
    /// Un callback absent échoue avant toute création de broker.
    pub async fn run<T, M, C>(&self, marshaller: M, callback: Option<C>) -> Result<(), HarnessError>
    where
        T: 'static,
        M: Marshaller<T> + 'static,
        C: BrokerCallback<T>,
    {
        let callback = callback.ok_or(HarnessError::MissingCallback)?;

        let broker = BrokerService::new(self.config.broker_name.clone());
        let connector = broker.add_connector(&self.config.endpoint)?;
        let guard = BrokerGuard::new(broker.clone(), connector.clone(), Arc::clone(&self.logger));

        let outcome = self.session(&broker, &connector, marshaller, callback).await;
        guard.shutdown().await;

        match outcome? {
            None => Ok(()),
            Some(failure) => self.settle(failure),
        }
    }

    async fn session<T, M, C>(
        &self,
        broker: &BrokerService,
        connector: &TransportConnector,
        marshaller: M,
        callback: C,
    ) -> Result<Option<CallbackFailure>, HarnessError>
    where
        T: 'static,
        M: Marshaller<T> + 'static,
        C: BrokerCallback<T>,
    {
        broker.start()?;
        wait_until_started(broker, &self.config, self.logger.as_ref()).await?;

        let endpoint = connector.connect_endpoint().ok_or(HarnessError::NotBound)?;
        let mut builder = MessagingClient::builder()
            .connection_factory(ConnectionFactory::new(endpoint))
            .message_converter(MarshallingMessageConverter::new(marshaller))
            .receive_timeout(self.config.receive_timeout);
        if let Some(destination) = &self.config.default_destination {
            builder = builder.default_destination(destination.clone());
        }
        let client = builder.build()?;

        self.logger.debug(&format!("running callback against broker '{}'", broker.name()));
        let view = broker.clone();
        let invocation = AssertUnwindSafe(async move { callback.with_broker(view, client).await })
            .catch_unwind()
            .await;

        Ok(match invocation {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(CallbackFailure::from_error(error)),
            Err(payload) => Some(CallbackFailure::from_panic(payload)),
        })
    }

    fn settle(&self, failure: CallbackFailure) -> Result<(), HarnessError> {
        match self.policy.classify(&failure) {
            Disposition::Absorb => {
                self.logger
                    .error(&format!("execution of broker session failed: {}", failure.message()));
                Ok(())
            }
            Disposition::Propagate => match failure {
                CallbackFailure::Panic { payload, .. } => std::panic::resume_unwind(payload),
                CallbackFailure::Assertion(assertion) => Err(HarnessError::Assertion(assertion)),
                CallbackFailure::Error(error) => Err(HarnessError::Callback(error)),
            },
        }
    }
}

/// Attend `Started` avec un intervalle qui double, borné par `startup_timeout`
pub(crate) async fn wait_until_started(
    broker: &BrokerService,
    config: &HarnessConfig,
    logger: &dyn HarnessLogger,
) -> Result<(), HarnessError> {
    let began = Instant::now();
    let ceiling = config.max_poll_interval.max(config.poll_interval);
    let mut interval = config.poll_interval;

    tokio::task::yield_now().await;
    loop {
        match broker.state() {
            BrokerState::Started => return Ok(()),
            BrokerState::Failed(reason) => return Err(HarnessError::BrokerFailed(reason)),
            _ => {}
        }

        let mut pause = interval;
        if let Some(limit) = config.startup_timeout {
            let elapsed = began.elapsed();
            if elapsed >= limit {
                return Err(HarnessError::StartupTimeout(limit));
            }
            pause = pause.min(limit - elapsed);
        }

        logger.debug(&format!("broker '{}' is {}, next check in {:?}", broker.name(), broker.state(), pause));
        tokio::time::sleep(pause).await;
        interval = (interval * 2).min(ceiling);
    }
}

/// Arrêt garanti : `shutdown()` sur le chemin normal, `Drop` si le run est abandonné
struct BrokerGuard {
    broker: Option<BrokerService>,
    connector: TransportConnector,
    logger: Arc<dyn HarnessLogger>,
}

impl BrokerGuard {
    fn new(broker: BrokerService, connector: TransportConnector, logger: Arc<dyn HarnessLogger>) -> Self {
        Self {
            broker: Some(broker),
            connector,
            logger,
        }
    }

    async fn shutdown(mut self) {
        let Some(broker) = self.broker.take() else {
            return;
        };

        let stopped = self.connector.stop().await;
        self.report(&format!("connector {}", self.connector.endpoint()), stopped);
        let stopped = broker.stop().await;
        self.report(&format!("broker '{}'", broker.name()), stopped);
    }

    /// Une erreur d'arrêt est journalisée, jamais propagée
    fn report(&self, target: &str, result: Result<(), BrokerError>) {
        match result {
            Ok(()) => {}
            // déjà arrêté par le callback : l'arrêt a bien eu lieu une fois
            Err(BrokerError::AlreadyStopped(_)) => self.logger.debug(&format!("{target} was already stopped")),
            Err(e) => self.logger.error(&format!("failed to stop {target}: {e}")),
        }
    }
}

impl Drop for BrokerGuard {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.take() {
            self.connector.abort();
            if broker.abort() {
                self.logger
                    .error(&format!("broker '{}' aborted: run dropped before cleanup", broker.name()));
            }
        }
    }
}

/// Test tokio exécuté dans un `BrokerTestHarness`
#[macro_export]
macro_rules! broker_test {
    ($name:ident, $config:expr, $payload:ty, $marshaller:expr, $body:expr) => {
        #[tokio::test]
        async fn $name() {
            let harness = $crate::harness::BrokerTestHarness::new($config);
            if let Err(e) = harness.run_with::<$payload, _, _, _>($marshaller, $body).await {
                panic!("Test '{}' failed: {}", stringify!($name), e);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RecordingLogger;
    use crate::marshaller::JsonMarshaller;
    use crate::policy::PropagateAll;
    use futures::future::BoxFuture;
    use log::Level;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        sku: String,
    }

    /// Port libre au moment de l'appel
    fn reserve_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn fast_config(port: u16) -> HarnessConfig {
        HarnessConfig::default()
            .with_endpoint(format!("tcp://127.0.0.1:{port}"))
            .with_poll_interval(Duration::from_millis(10))
            .with_startup_timeout(Some(Duration::from_secs(5)))
            .with_receive_timeout(Duration::from_millis(200))
    }

    async fn port_is_free(port: u16) -> bool {
        tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok()
    }

    type Seen = Arc<Mutex<Option<BrokerService>>>;

    #[tokio::test]
    async fn test_callback_sees_started_broker_and_client() {
        let port = reserve_port();
        let seen: Seen = Arc::default();
        let seen_in_callback = Arc::clone(&seen);

        let harness = BrokerTestHarness::new(fast_config(port));
        harness
            .run_with(JsonMarshaller, move |broker: BrokerService, client: MessagingClient<Order>| async move {
                assert!(broker.is_started());
                client.ping().await?;
                *seen_in_callback.lock() = Some(broker);
                Ok(())
            })
            .await
            .unwrap();

        let broker = seen.lock().take().unwrap();
        assert_eq!(broker.state(), BrokerState::Stopped);
        assert!(broker.connectors().iter().all(|c| !c.is_running()));
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_messages_round_trip_through_broker() {
        let port = reserve_port();
        let harness = BrokerTestHarness::new(fast_config(port).with_default_destination("orders"));

        harness
            .run_with(JsonMarshaller, |broker: BrokerService, client: MessagingClient<Order>| async move {
                let order = Order { id: 1, sku: "RELAIS-7".into() };
                client.convert_and_send(&order).await?;
                assert_eq!(broker.queue_stats("orders").depth, 1);

                let received = client.receive_and_convert().await?;
                assert_eq!(received, Some(order));
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_callback_starts_nothing() {
        let port = reserve_port();
        let harness = BrokerTestHarness::new(fast_config(port));

        let result = harness.run(JsonMarshaller, None::<NoCallback<Order>>).await;
        assert!(matches!(result, Err(HarnessError::MissingCallback)));
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_rejected() {
        let harness = BrokerTestHarness::new(HarnessConfig::default().with_endpoint("vm://localhost"));
        let result = harness
            .run_with(JsonMarshaller, |_broker: BrokerService, _client: MessagingClient<Order>| async move { Ok(()) })
            .await;

        assert!(matches!(
            result,
            Err(HarnessError::Broker(BrokerError::Endpoint(relais_broker::EndpointError::UnsupportedScheme(_))))
        ));
    }

    #[tokio::test]
    async fn test_other_errors_are_logged_and_absorbed() {
        let port = reserve_port();
        let logger = RecordingLogger::new();
        let seen: Seen = Arc::default();
        let seen_in_callback = Arc::clone(&seen);

        let harness = BrokerTestHarness::new(fast_config(port)).with_logger(logger.clone());
        let result = harness
            .run_with(JsonMarshaller, move |broker: BrokerService, _client: MessagingClient<Order>| async move {
                *seen_in_callback.lock() = Some(broker);
                Err(anyhow::anyhow!("boom"))
            })
            .await;

        assert!(result.is_ok());
        assert!(logger.contains(Level::Error, "boom"));
        let broker = seen.lock().take().unwrap();
        assert_eq!(broker.state(), BrokerState::Stopped);
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_panicking_assertion_is_rethrown_after_cleanup() {
        let port = reserve_port();
        let seen: Seen = Arc::default();
        let seen_in_callback = Arc::clone(&seen);

        let harness = BrokerTestHarness::new(fast_config(port));
        let run = harness.run_with(JsonMarshaller, move |broker: BrokerService, _client: MessagingClient<Order>| async move {
            *seen_in_callback.lock() = Some(broker);
            assert_eq!(1, 2);
            Ok(())
        });
        let caught = AssertUnwindSafe(run).catch_unwind().await;

        let payload = caught.expect_err("assertion should propagate");
        let message = CallbackFailure::from_panic(payload).message();
        assert!(message.contains("left == right"), "unexpected panic message: {message}");

        let broker = seen.lock().take().unwrap();
        assert_eq!(broker.state(), BrokerState::Stopped);
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_explicit_assertion_error_propagates() {
        let port = reserve_port();
        let logger = RecordingLogger::new();
        let harness = BrokerTestHarness::new(fast_config(port)).with_logger(logger.clone());

        let result = harness
            .run_with(JsonMarshaller, |broker: BrokerService, _client: MessagingClient<Order>| async move {
                crate::ensure_that!(broker.queue_stats("orders").depth == 3, "expected 3 orders");
                Ok(())
            })
            .await;

        match result {
            Err(HarnessError::Assertion(assertion)) => assert_eq!(assertion.message, "expected 3 orders"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(logger.messages_at(Level::Error).is_empty());
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_callback_stopping_broker_keeps_assertion_outcome() {
        let port = reserve_port();
        let logger = RecordingLogger::new();
        let harness = BrokerTestHarness::new(fast_config(port)).with_logger(logger.clone());

        let result = harness
            .run_with(JsonMarshaller, |broker: BrokerService, _client: MessagingClient<Order>| async move {
                broker.stop().await?;
                crate::ensure_that!(broker.is_started(), "broker stopped by the test");
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(HarnessError::Assertion(ref a)) if a.message == "broker stopped by the test"));
        assert!(logger.messages_at(Level::Error).is_empty());
        assert!(logger.contains(Level::Debug, "broker 'relais-test' was already stopped"));
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_callback_stopping_broker_is_not_a_failure() {
        let port = reserve_port();
        let logger = RecordingLogger::new();
        let harness = BrokerTestHarness::new(fast_config(port)).with_logger(logger.clone());

        let result = harness
            .run_with(JsonMarshaller, |broker: BrokerService, _client: MessagingClient<Order>| async move {
                broker.stop().await?;
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert!(logger.messages_at(Level::Error).is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_errors_are_logged_only() {
        let logger = RecordingLogger::new();
        let broker = BrokerService::new("cleanup");
        let connector = broker.add_connector("tcp://127.0.0.1:0").unwrap();
        let guard = BrokerGuard::new(broker.clone(), connector.clone(), Arc::new(logger.clone()));

        guard.report("connector tcp://127.0.0.1:0", Err(BrokerError::ConnectorTask(connector.endpoint().clone())));
        assert!(logger.contains(Level::Error, "failed to stop connector tcp://127.0.0.1:0"));

        // l'arrêt normal se poursuit malgré l'erreur journalisée
        guard.shutdown().await;
        assert_eq!(broker.state(), BrokerState::Stopped);
        assert_eq!(logger.messages_at(Level::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_propagate_all_policy_surfaces_errors() {
        let port = reserve_port();
        let harness = BrokerTestHarness::new(fast_config(port)).with_policy(PropagateAll);

        let result = harness
            .run_with(JsonMarshaller, |_broker: BrokerService, _client: MessagingClient<Order>| async move {
                Err(anyhow::anyhow!("boom"))
            })
            .await;

        assert!(matches!(result, Err(HarnessError::Callback(ref e)) if e.to_string() == "boom"));
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_failed_start() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let called = Arc::new(Mutex::new(false));
        let called_in_callback = Arc::clone(&called);

        let harness = BrokerTestHarness::new(fast_config(port));
        let result = harness
            .run_with(JsonMarshaller, move |_broker: BrokerService, _client: MessagingClient<Order>| async move {
                *called_in_callback.lock() = true;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(HarnessError::BrokerFailed(_))));
        assert!(!*called.lock());
    }

    #[tokio::test]
    async fn test_wait_until_started_times_out() {
        let broker = BrokerService::new("never-started");
        let config = fast_config(0).with_startup_timeout(Some(Duration::from_millis(50)));
        let logger = RecordingLogger::new();

        let result = wait_until_started(&broker, &config, &logger).await;
        assert!(matches!(result, Err(HarnessError::StartupTimeout(limit)) if limit == Duration::from_millis(50)));
        assert!(logger.contains(Level::Debug, "broker 'never-started' is not_started"));
    }

    #[tokio::test]
    async fn test_dropped_run_aborts_broker() {
        let port = reserve_port();
        let seen: Seen = Arc::default();
        let seen_in_callback = Arc::clone(&seen);

        let harness = BrokerTestHarness::new(fast_config(port));
        let run = harness.run_with(JsonMarshaller, move |broker: BrokerService, _client: MessagingClient<Order>| async move {
            *seen_in_callback.lock() = Some(broker);
            std::future::pending::<()>().await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(300), run).await.is_err());

        let broker = seen.lock().take().unwrap();
        assert_eq!(broker.state(), BrokerState::Stopped);
    }

    struct DepthCheck {
        expected: usize,
    }

    impl BrokerCallback<Order> for DepthCheck {
        type Future = BoxFuture<'static, anyhow::Result<()>>;

        fn with_broker(self, broker: BrokerService, client: MessagingClient<Order>) -> Self::Future {
            Box::pin(async move {
                for id in 0..self.expected as u32 {
                    client.convert_and_send_to("audit", &Order { id, sku: format!("SKU-{id}") }).await?;
                }
                crate::ensure_that!(broker.queue_stats("audit").depth == self.expected);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_struct_callback() {
        let port = reserve_port();
        let harness = BrokerTestHarness::new(fast_config(port));
        harness.run(JsonMarshaller, Some(DepthCheck { expected: 3 })).await.unwrap();
    }

    crate::broker_test!(
        test_macro_functionality,
        fast_config(reserve_port()).with_default_destination("macro"),
        Order,
        JsonMarshaller,
        |broker: BrokerService, client: MessagingClient<Order>| async move {
            client.convert_and_send(&Order { id: 9, sku: "MACRO".into() }).await?;
            assert_eq!(broker.queue_stats("macro").enqueued, 1);
            Ok(())
        }
    );
}
