// Operation Context
//
// Entry point of the dispatcher. `invoke` selects the satisfiable variants
// of an operation for the given arguments, ranks them and attempts them in
// order. A retry signal narrows the candidates to the signatures it names;
// any other failure ends the call.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::observer::{ContextObserver, LoggingObserver};
use super::ranker::SpecificityRanker;
use super::registry::{DuplicatePolicy, OperationRegistry, RegistryBuilder};
use crate::error::{DispatchError, RegistrationError};
use crate::models::{
    OperationDescription, OperationOutput, OperationVariant, Params, Signature, VariantOutcome,
};
use crate::objects::Argument;

/// Which operations may be retried and how often
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries within one call
    pub limit: u32,
    /// When non-empty, only these operations may be retried
    pub allow: Vec<String>,
    /// Operations that may never be retried
    pub deny: Vec<String>,
}

impl RetryPolicy {
    pub fn can_retry(&self, operation: &str) -> bool {
        if self.deny.iter().any(|name| name == operation) {
            return false;
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|name| name == operation) {
            return false;
        }
        true
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

/// Options for building an `OperationContext`
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub retry: RetryPolicy,
    pub duplicate_policy: DuplicatePolicy,
}

/// Dispatches operation calls to registered variants
///
/// The registry is held as an immutable snapshot. Calls take the snapshot
/// under a short read lock and never hold the lock while a variant runs,
/// so variants can call back into the context.
pub struct OperationContext {
    registry: RwLock<Arc<OperationRegistry>>,
    retry: RetryPolicy,
    observers: Vec<Arc<dyn ContextObserver>>,
}

impl OperationContext {
    /// Create a context over a frozen registry, logging through tracing
    pub fn new(registry: OperationRegistry, retry: RetryPolicy) -> Self {
        Self {
            registry: RwLock::new(Arc::new(registry)),
            retry,
            observers: vec![Arc::new(LoggingObserver)],
        }
    }

    /// Create a context with the default operation catalogue
    pub fn with_default_operations(options: ContextOptions) -> Result<Self, RegistrationError> {
        let mut builder = RegistryBuilder::new(options.duplicate_policy);
        crate::ops::register_default_operations(&mut builder)?;
        Ok(Self::new(builder.freeze(), options.retry))
    }

    /// Add an observer notified about every call
    ///
    /// Observers are shared by all calls on this context. A stateful
    /// observer such as `CollectingObserver` tracks one caller at a time;
    /// concurrent callers should each use their own context and observer.
    pub fn with_observer(mut self, observer: Arc<dyn ContextObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Remove all observers, including the default logging one
    pub fn without_observers(mut self) -> Self {
        self.observers.clear();
        self
    }

    /// Current registry snapshot
    pub async fn registry(&self) -> Arc<OperationRegistry> {
        self.registry.read().await.clone()
    }

    /// Register more variants after startup (plugin loading)
    ///
    /// Writers are serialized by the registry write lock. Calls already in
    /// progress keep the snapshot they started with.
    pub async fn extend<F>(&self, register: F) -> Result<(), RegistrationError>
    where
        F: FnOnce(&mut RegistryBuilder) -> Result<(), RegistrationError>,
    {
        let mut current = self.registry.write().await;
        let mut builder = current.to_builder();
        register(&mut builder)?;
        *current = Arc::new(builder.freeze());
        Ok(())
    }

    /// Catalogue of registered operations
    pub async fn describe(&self) -> Vec<OperationDescription> {
        self.registry().await.describe()
    }

    /// Call operation `operation` with dispatch arguments only
    pub async fn invoke(
        &self,
        operation: &str,
        args: Vec<Argument>,
    ) -> Result<OperationOutput, DispatchError> {
        self.invoke_with(operation, args, Params::new()).await
    }

    /// Call operation `operation` with dispatch arguments and parameters
    pub async fn invoke_with(
        &self,
        operation: &str,
        args: Vec<Argument>,
        params: Params,
    ) -> Result<OperationOutput, DispatchError> {
        let registry = self.registry().await;
        let variants = registry
            .variants(operation)
            .ok_or_else(|| DispatchError::UnknownOperation(operation.to_string()))?;

        let expected = registry.prototype(operation).map(Signature::len).unwrap_or(0);
        if args.len() != expected {
            return Err(DispatchError::ArgumentCount {
                operation: operation.to_string(),
                expected,
                found: args.len(),
            });
        }

        let ranker = SpecificityRanker::new(registry.ranks());
        let mut candidates = ranker.rank(Self::satisfiable(variants, &args, |_| true));

        if candidates.is_empty() {
            return Err(DispatchError::NoCandidate {
                operation: operation.to_string(),
                arguments: args.iter().map(Argument::describe).collect(),
                registered: variants.iter().map(|v| v.signature.to_string()).collect(),
            });
        }

        tracing::debug!(
            "Dispatching {} over candidates: {}",
            operation,
            Self::labels(&candidates)
        );

        let mut visited: HashSet<Signature> = HashSet::new();
        let mut reasons: Vec<String> = Vec::new();
        let mut retry_reason: Option<String> = None;
        let mut retries: u32 = 0;

        loop {
            let variant = candidates.remove(0);
            visited.insert(variant.signature.clone());

            match &retry_reason {
                None => self.observers.iter().for_each(|o| o.will_call(&variant)),
                Some(reason) => self.observers.iter().for_each(|o| o.will_retry(&variant, reason)),
            }

            if variant.experimental {
                tracing::warn!("operation {} is experimental", variant.label());
            }

            let signal = match variant.call(self, &args, &params).await {
                VariantOutcome::Success(output) => {
                    self.observers.iter().for_each(|o| o.did_call(&variant, retries));
                    return Ok(output);
                }
                VariantOutcome::Failure(err) => {
                    return Err(self.fail(operation, DispatchError::VariantFailure(err)));
                }
                VariantOutcome::Retry(signal) => signal,
            };

            reasons.push(format!("{}: {}", variant.label(), signal.reason));

            if !self.retry.can_retry(operation) {
                return Err(self.fail(
                    operation,
                    DispatchError::RetryNotAllowed {
                        operation: operation.to_string(),
                        reason: signal.reason,
                    },
                ));
            }

            candidates = if signal.preferred_signatures.is_empty() {
                candidates
                    .into_iter()
                    .filter(|v| !visited.contains(&v.signature))
                    .collect()
            } else {
                ranker.rank(Self::satisfiable(variants, &args, |v| {
                    signal.preferred_signatures.contains(&v.signature)
                        && !visited.contains(&v.signature)
                }))
            };

            if candidates.is_empty() {
                return Err(self.fail(
                    operation,
                    DispatchError::Exhausted {
                        operation: operation.to_string(),
                        reasons,
                    },
                ));
            }

            if retries >= self.retry.limit {
                return Err(self.fail(
                    operation,
                    DispatchError::RetryLimitExceeded {
                        operation: operation.to_string(),
                        limit: self.retry.limit,
                        reasons,
                    },
                ));
            }
            retries += 1;

            tracing::debug!(
                "Retrying {} over candidates: {}",
                operation,
                Self::labels(&candidates)
            );
            retry_reason = Some(signal.reason);
        }
    }

    fn satisfiable<P>(
        variants: &[Arc<OperationVariant>],
        args: &[Argument],
        accept: P,
    ) -> Vec<Arc<OperationVariant>>
    where
        P: Fn(&OperationVariant) -> bool,
    {
        variants
            .iter()
            .filter(|v| accept(v) && v.signature.is_satisfied_by(args))
            .cloned()
            .collect()
    }

    fn labels(candidates: &[Arc<OperationVariant>]) -> String {
        candidates
            .iter()
            .map(|v| v.label())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn fail(&self, operation: &str, error: DispatchError) -> DispatchError {
        self.observers.iter().for_each(|o| o.did_fail(operation, &error));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use crate::models::{
        handler_fn, OperationHandler, RankTable, Representation, RetrySignal, VariantDefinition,
    };
    use crate::objects::testing::DummyObject;
    use crate::objects::DataObject;
    use crate::services::observer::CollectingObserver;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn sig(reps: &[&str]) -> Signature {
        Signature::parse(reps).unwrap()
    }

    fn value(v: &'static str) -> VariantOutcome {
        VariantOutcome::Success(OperationOutput::Value(json!(v)))
    }

    /// Handler that logs its label and then produces `outcome`
    fn logged<F>(log: &CallLog, label: &'static str, outcome: F) -> Arc<dyn OperationHandler>
    where
        F: Fn(&[Argument]) -> VariantOutcome + Send + Sync + 'static,
    {
        let log = log.clone();
        handler_fn(move |args, _| {
            log.lock().unwrap().push(label.to_string());
            outcome(args)
        })
    }

    fn context(builder: RegistryBuilder) -> OperationContext {
        OperationContext::new(builder.freeze(), RetryPolicy::default())
    }

    fn output_value(output: OperationOutput) -> serde_json::Value {
        output.as_value().cloned().unwrap()
    }

    /// Name of the single field of a dummy argument (its payload)
    fn payload(arg: &Argument) -> String {
        arg.as_object().map(|o| o.fields()[0].clone()).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_rows_only_objects_skip_sql_variant() {
        let log: CallLog = Arc::default();
        let mut builder = RegistryBuilder::default();
        builder
            .register("append", sig(&["rows[]"]), logged(&log, "rows", |_| value("rows")))
            .unwrap();
        builder.register("append", sig(&["sql[]"]), logged(&log, "sql", |_| value("sql"))).unwrap();
        let ctx = context(builder);

        let list = Argument::List(vec![
            DummyObject::shared(&["rows"], "a"),
            DummyObject::shared(&["rows"], "b"),
        ]);
        let result = ctx.invoke("append", vec![list]).await.unwrap();

        assert_eq!(output_value(result), json!("rows"));
        assert_eq!(*log.lock().unwrap(), vec!["rows"]);
    }

    #[tokio::test]
    async fn test_sql_retry_falls_back_to_rows() {
        let log: CallLog = Arc::default();
        let mut builder = RegistryBuilder::default();
        builder
            .register_variant(
                VariantDefinition::new(
                    "append",
                    sig(&["sql[]"]),
                    logged(&log, "sql", |args| {
                        let objects = args[0].as_list().unwrap();
                        let first = objects[0].fields();
                        if objects.iter().all(|o| o.fields() == first) {
                            value("sql")
                        } else {
                            VariantOutcome::retry(
                                vec![sig(&["rows[]"])],
                                "objects live in different connections",
                            )
                        }
                    }),
                )
                .priority(1),
            )
            .unwrap();
        builder
            .register("append", sig(&["rows[]"]), logged(&log, "rows", |_| value("rows")))
            .unwrap();

        let observer = Arc::new(CollectingObserver::new());
        let ctx = context(builder).with_observer(observer.clone());

        let local = DummyObject::shared(&["sql", "rows"], "local");
        let remote = DummyObject::shared(&["sql", "rows"], "remote");

        let same = ctx
            .invoke("append", vec![Argument::List(vec![local.clone(), local.clone()])])
            .await
            .unwrap();
        assert_eq!(output_value(same), json!("sql"));

        let mixed = ctx
            .invoke("append", vec![Argument::List(vec![local, remote])])
            .await
            .unwrap();
        assert_eq!(output_value(mixed), json!("rows"));
        assert_eq!(*log.lock().unwrap(), vec!["sql", "sql", "rows"]);

        let history = observer.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].retries, 1);
        assert_eq!(history[1].signature, sig(&["rows[]"]));
        assert_eq!(
            history[1].tried,
            vec![(
                "append(sql[])".to_string(),
                "objects live in different connections".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_no_candidate_names_representations() {
        let mut builder = RegistryBuilder::default();
        builder.register("append", sig(&["rows[]"]), handler_fn(|_, _| value("rows"))).unwrap();
        builder.register("append", sig(&["sql[]"]), handler_fn(|_, _| value("sql"))).unwrap();
        let ctx = context(builder);

        let list = Argument::List(vec![DummyObject::shared(&["text"], "a")]);
        let err = ctx.invoke("append", vec![list]).await.unwrap_err();

        match &err {
            DispatchError::NoCandidate {
                operation,
                arguments,
                registered,
            } => {
                assert_eq!(operation, "append");
                assert_eq!(arguments, &vec!["[text][]".to_string()]);
                assert_eq!(registered, &vec!["rows[]".to_string(), "sql[]".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let mut builder = RegistryBuilder::new(DuplicatePolicy::Reject);
        builder.register("append", sig(&["rows[]"]), handler_fn(|_, _| value("a"))).unwrap();
        let err = builder
            .register("append", sig(&["rows[]"]), handler_fn(|_, _| value("b")))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_join_retry_with_narrowed_signature() {
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "join",
                sig(&["sql", "sql"]),
                handler_fn(|args, _| {
                    if payload(&args[0]) == payload(&args[1]) {
                        value("SQL")
                    } else {
                        VariantOutcome::retry(vec![sig(&["sql", "rows"])], "different connections")
                    }
                }),
            )
            .unwrap();
        builder
            .register("join", sig(&["sql", "rows"]), handler_fn(|_, _| value("ITERATOR")))
            .unwrap();
        // More specific than (sql, rows) but not listed in the retry signal
        builder.register("join", sig(&["rows", "sql"]), handler_fn(|_, _| value("WRONG"))).unwrap();
        let ctx = context(builder);

        let local = DummyObject::shared(&["sql", "rows"], "local");
        let remote = DummyObject::shared(&["sql", "rows"], "remote");

        let result = ctx
            .invoke("join", vec![local.clone().into(), local.clone().into()])
            .await
            .unwrap();
        assert_eq!(output_value(result), json!("SQL"));

        let result = ctx.invoke("join", vec![local.into(), remote.into()]).await.unwrap();
        assert_eq!(output_value(result), json!("ITERATOR"));
    }

    #[tokio::test]
    async fn test_retry_to_unsatisfiable_signature_exhausts() {
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "fail",
                sig(&["sql", "rows"]),
                handler_fn(|_, _| VariantOutcome::retry(vec![sig(&["text", "text"])], "no luck")),
            )
            .unwrap();
        builder.register("fail", sig(&["text", "text"]), handler_fn(|_, _| value("text"))).unwrap();
        let ctx = context(builder);

        let obj = DummyObject::shared(&["sql", "rows"], "local");
        let err = ctx.invoke("fail", vec![obj.clone().into(), obj.into()]).await.unwrap_err();
        match err {
            DispatchError::Exhausted { reasons, .. } => {
                assert_eq!(reasons, vec!["fail(sql, rows): no luck".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_repeat_of_visited_signature() {
        let log: CallLog = Arc::default();
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "repeat",
                sig(&["sql"]),
                logged(&log, "sql", |_| {
                    VariantOutcome::retry(vec![sig(&["rows"])], "sql declined")
                }),
            )
            .unwrap();
        builder
            .register(
                "repeat",
                sig(&["rows"]),
                logged(&log, "rows", |_| {
                    VariantOutcome::retry(vec![sig(&["sql"]), sig(&["rows"])], "rows declined")
                }),
            )
            .unwrap();
        let ctx = context(builder);

        let obj = DummyObject::shared(&["sql", "rows"], "");
        let err = ctx.invoke("repeat", vec![obj.into()]).await.unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["sql", "rows"]);
        match err {
            DispatchError::Exhausted { reasons, .. } => {
                assert_eq!(
                    reasons,
                    vec![
                        "repeat(sql): sql declined".to_string(),
                        "repeat(rows): rows declined".to_string()
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_preferred_signatures_tries_remaining() {
        let log: CallLog = Arc::default();
        let mut builder = RegistryBuilder::default();
        builder.register("pick", sig(&["*"]), logged(&log, "any", |_| value("any"))).unwrap();
        builder
            .register(
                "pick",
                sig(&["sql"]),
                logged(&log, "sql", |_| VariantOutcome::Retry(RetrySignal::any("busy"))),
            )
            .unwrap();
        builder
            .register(
                "pick",
                sig(&["rows"]),
                logged(&log, "rows", |_| VariantOutcome::Retry(RetrySignal::any("busy"))),
            )
            .unwrap();
        let ctx = context(builder);

        let obj = DummyObject::shared(&["sql", "rows"], "");
        let result = ctx.invoke("pick", vec![obj.into()]).await.unwrap();

        assert_eq!(output_value(result), json!("any"));
        assert_eq!(*log.lock().unwrap(), vec!["sql", "rows", "any"]);
    }

    #[tokio::test]
    async fn test_failure_is_not_retried() {
        let log: CallLog = Arc::default();
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "limit",
                sig(&["sql"]),
                logged(&log, "sql", |_| {
                    VariantOutcome::Failure(OperationError::Argument(
                        "count must be positive".to_string(),
                    ))
                }),
            )
            .unwrap();
        builder.register("limit", sig(&["rows"]), logged(&log, "rows", |_| value("rows"))).unwrap();
        let ctx = context(builder);

        let obj = DummyObject::shared(&["sql", "rows"], "");
        let err = ctx.invoke("limit", vec![obj.into()]).await.unwrap_err();

        assert!(err.is_variant_failure());
        assert_eq!(err.to_string(), "Argument error: count must be positive");
        assert_eq!(*log.lock().unwrap(), vec!["sql"]);
    }

    #[tokio::test]
    async fn test_unknown_operation_and_argument_count() {
        let mut builder = RegistryBuilder::default();
        builder.register("join", sig(&["rows", "rows"]), handler_fn(|_, _| value("rows"))).unwrap();
        let ctx = context(builder);

        let obj = DummyObject::shared(&["rows"], "");
        let err = ctx.invoke("missing", vec![obj.clone().into()]).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownOperation(_)));

        let err = ctx.invoke("join", vec![obj.into()]).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ArgumentCount { expected: 2, found: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_attempt_order_is_deterministic() {
        let log: CallLog = Arc::default();
        let mut builder = RegistryBuilder::default();
        for (label, reps) in [
            ("rows-rows", ["rows", "rows"]),
            ("sql-rows", ["sql", "rows"]),
            ("rows-sql", ["rows", "sql"]),
            ("sql-sql", ["sql", "sql"]),
        ] {
            builder
                .register(
                    "merge",
                    sig(&reps),
                    logged(&log, label, |_| VariantOutcome::Retry(RetrySignal::any("next"))),
                )
                .unwrap();
        }
        let ctx = context(builder);
        let obj = DummyObject::shared(&["sql", "rows"], "");

        let mut runs = Vec::new();
        for _ in 0..3 {
            log.lock().unwrap().clear();
            let err = ctx
                .invoke("merge", vec![obj.clone().into(), obj.clone().into()])
                .await
                .unwrap_err();
            assert!(matches!(err, DispatchError::Exhausted { .. }));
            runs.push(log.lock().unwrap().clone());
        }

        assert_eq!(runs[0], vec!["sql-sql", "sql-rows", "rows-sql", "rows-rows"]);
        assert!(runs.iter().all(|run| run == &runs[0]));
    }

    #[tokio::test]
    async fn test_custom_rank_table_changes_first_attempt() {
        let ranks = RankTable::default().with_rank(Representation::Custom("mongo".to_string()), 50);
        let mut builder = RegistryBuilder::default().with_rank_table(ranks);
        builder.register("count", sig(&["sql"]), handler_fn(|_, _| value("sql"))).unwrap();
        builder.register("count", sig(&["mongo"]), handler_fn(|_, _| value("mongo"))).unwrap();
        let ctx = context(builder);

        let obj = DummyObject::shared(&["sql", "mongo"], "");
        let result = ctx.invoke("count", vec![obj.into()]).await.unwrap();
        assert_eq!(output_value(result), json!("mongo"));
    }

    #[tokio::test]
    async fn test_retry_allow_and_deny() {
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "swim",
                sig(&["sql"]),
                handler_fn(|_, _| VariantOutcome::retry(vec![sig(&["rows"])], "shallow")),
            )
            .unwrap();
        builder.register("swim", sig(&["rows"]), handler_fn(|_, _| value("good"))).unwrap();
        let registry = builder.freeze();
        let obj = DummyObject::shared(&["sql", "rows"], "");

        let policies = [
            (vec![], vec![], true),
            (vec![], vec!["swim"], false),
            (vec!["swim"], vec![], true),
            (vec!["swim"], vec!["swim"], false),
            (vec!["dive"], vec![], false),
        ];

        for (allow, deny, succeeds) in policies {
            let retry = RetryPolicy {
                allow: allow.iter().map(|s| s.to_string()).collect(),
                deny: deny.iter().map(|s| s.to_string()).collect(),
                ..RetryPolicy::default()
            };
            let ctx = OperationContext::new(registry.clone(), retry);
            let result = ctx.invoke("swim", vec![obj.clone().into()]).await;
            if succeeds {
                assert_eq!(output_value(result.unwrap()), json!("good"));
            } else {
                assert!(matches!(result, Err(DispatchError::RetryNotAllowed { .. })));
            }
        }
    }

    /// Context over `walk` variants that all decline, allowing one retry
    fn tired_walkers(reps: &[&str]) -> OperationContext {
        let mut builder = RegistryBuilder::default();
        for rep in reps {
            let tired = handler_fn(|_, _| VariantOutcome::Retry(RetrySignal::any("tired")));
            builder.register("walk", sig(&[*rep]), tired).unwrap();
        }
        let retry = RetryPolicy {
            limit: 1,
            ..RetryPolicy::default()
        };
        OperationContext::new(builder.freeze(), retry)
    }

    #[tokio::test]
    async fn test_retry_limit() {
        let ctx = tired_walkers(&["sql", "rows", "*"]);

        let obj = DummyObject::shared(&["sql", "rows"], "");
        let err = ctx.invoke("walk", vec![obj.into()]).await.unwrap_err();
        match err {
            DispatchError::RetryLimitExceeded { limit, reasons, .. } => {
                assert_eq!(limit, 1);
                assert_eq!(
                    reasons,
                    vec!["walk(sql): tired".to_string(), "walk(rows): tired".to_string()]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_last_candidate_retry_exhausts_within_limit() {
        let ctx = tired_walkers(&["sql", "rows"]);

        let obj = DummyObject::shared(&["sql", "rows"], "");
        let err = ctx.invoke("walk", vec![obj.into()]).await.unwrap_err();
        match err {
            DispatchError::Exhausted { reasons, .. } => {
                assert_eq!(
                    reasons,
                    vec!["walk(sql): tired".to_string(), "walk(rows): tired".to_string()]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct Aggregate {
        log: CallLog,
        sql: bool,
    }

    #[async_trait]
    impl OperationHandler for Aggregate {
        async fn call(
            &self,
            _ctx: &OperationContext,
            _args: &[Argument],
            params: &Params,
        ) -> VariantOutcome {
            if self.sql && params.get("fail") == Some(&json!(true)) {
                return VariantOutcome::retry(vec![sig(&["rows"])], "window not supported");
            }
            self.log
                .lock()
                .unwrap()
                .push(if self.sql { "-SQL-" } else { "-ROWS-" }.to_string());
            VariantOutcome::Success(OperationOutput::Empty)
        }
    }

    struct WindowAggregate {
        log: CallLog,
    }

    #[async_trait]
    impl OperationHandler for WindowAggregate {
        async fn call(
            &self,
            ctx: &OperationContext,
            args: &[Argument],
            params: &Params,
        ) -> VariantOutcome {
            self.log.lock().unwrap().push("START".to_string());
            if let Err(err) = ctx.invoke_with("aggregate", args.to_vec(), params.clone()).await {
                return VariantOutcome::Failure(err.into());
            }
            self.log.lock().unwrap().push("END".to_string());
            VariantOutcome::Success(OperationOutput::Empty)
        }
    }

    #[tokio::test]
    async fn test_nested_retry_resolves_inside_nested_call() {
        let log: CallLog = Arc::default();
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "aggregate",
                sig(&["sql"]),
                Arc::new(Aggregate { log: log.clone(), sql: true }),
            )
            .unwrap();
        builder
            .register(
                "aggregate",
                sig(&["rows"]),
                Arc::new(Aggregate { log: log.clone(), sql: false }),
            )
            .unwrap();
        builder
            .register(
                "window_aggregate",
                sig(&["sql"]),
                Arc::new(WindowAggregate { log: log.clone() }),
            )
            .unwrap();
        let observer = Arc::new(CollectingObserver::new());
        let ctx = context(builder).with_observer(observer.clone());

        let obj: Arc<dyn DataObject> = Arc::new(DummyObject::new(&["sql", "rows"], ""));

        let params = Params::new().with("fail", true);
        ctx.invoke_with("window_aggregate", vec![obj.clone().into()], params)
            .await
            .unwrap();
        assert_eq!(log.lock().unwrap().concat(), "START-ROWS-END");

        log.lock().unwrap().clear();
        ctx.invoke_with("window_aggregate", vec![obj.into()], Params::new().with("fail", false))
            .await
            .unwrap();
        assert_eq!(log.lock().unwrap().concat(), "START-SQL-END");

        let history = observer.history();
        let operations: Vec<&str> = history.iter().map(|r| r.operation.as_str()).collect();
        assert_eq!(
            operations,
            vec!["aggregate", "window_aggregate", "aggregate", "window_aggregate"]
        );
        assert_eq!(history[0].retries, 1);
        assert_eq!(history[1].retries, 0);
    }

    #[tokio::test]
    async fn test_extend_after_startup() {
        let mut builder = RegistryBuilder::default();
        builder.register("limit", sig(&["rows"]), handler_fn(|_, _| value("rows"))).unwrap();
        let ctx = context(builder);
        let obj = DummyObject::shared(&["sql", "rows"], "");

        let before = ctx.invoke("limit", vec![obj.clone().into()]).await.unwrap();
        assert_eq!(output_value(before), json!("rows"));

        ctx.extend(|builder| {
            builder.register("limit", sig(&["sql"]), handler_fn(|_, _| value("sql")))?;
            Ok(())
        })
        .await
        .unwrap();

        let after = ctx.invoke("limit", vec![obj.into()]).await.unwrap();
        assert_eq!(output_value(after), json!("sql"));

        let err = ctx
            .extend(|builder| {
                builder.register("limit", sig(&["sql"]), handler_fn(|_, _| value("again")))?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Conflict { .. }));
        assert_eq!(ctx.registry().await.variants("limit").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_registry() {
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "append",
                sig(&["sql[]"]),
                handler_fn(|args, _| {
                    let objects = args[0].as_list().unwrap();
                    let first = objects[0].fields();
                    if objects.iter().all(|o| o.fields() == first) {
                        value("sql")
                    } else {
                        VariantOutcome::retry(vec![sig(&["rows[]"])], "different connections")
                    }
                }),
            )
            .unwrap();
        builder.register("append", sig(&["rows[]"]), handler_fn(|_, _| value("rows"))).unwrap();
        let ctx = Arc::new(context(builder).without_observers());

        let mut handles = Vec::new();
        for i in 0..16 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let other = if i % 2 == 0 { "a" } else { "b" };
                let list = Argument::List(vec![
                    DummyObject::shared(&["sql", "rows"], "a"),
                    DummyObject::shared(&["sql", "rows"], other),
                ]);
                let expected = if i % 2 == 0 { "sql" } else { "rows" };
                let result = ctx.invoke("append", vec![list]).await.unwrap();
                (result.as_value().cloned().unwrap(), json!(expected))
            }));
        }

        for handle in handles {
            let (got, expected) = handle.await.unwrap();
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn test_observer_per_concurrent_caller() {
        let mut builder = RegistryBuilder::default();
        builder
            .register(
                "join",
                sig(&["sql"]),
                handler_fn(|_, _| VariantOutcome::retry(vec![sig(&["rows"])], "remote")),
            )
            .unwrap();
        builder.register("join", sig(&["rows"]), handler_fn(|_, _| value("rows"))).unwrap();
        let registry = builder.freeze();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let observer = Arc::new(CollectingObserver::new());
            let ctx = OperationContext::new(registry.clone(), RetryPolicy::default())
                .without_observers()
                .with_observer(observer.clone());
            handles.push(tokio::spawn(async move {
                let obj = DummyObject::shared(&["sql", "rows"], "");
                ctx.invoke("join", vec![obj.into()]).await.unwrap();
                observer.history()
            }));
        }

        for handle in handles {
            let history = handle.await.unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(
                history[0].tried,
                vec![("join(sql)".to_string(), "remote".to_string())]
            );
        }
    }

    #[tokio::test]
    async fn test_experimental_variant_still_runs() {
        let mut builder = RegistryBuilder::default();
        builder
            .register_variant(
                VariantDefinition::new("keep_fields", sig(&["*"]), handler_fn(|_, _| value("kept")))
                    .experimental(),
            )
            .unwrap();
        let ctx = context(builder);

        let obj = DummyObject::shared(&["rows"], "");
        let result = ctx.invoke("keep_fields", vec![obj.into()]).await;
        tokio_test::assert_ok!(&result);
        assert_eq!(output_value(result.unwrap()), json!("kept"));
    }
}
