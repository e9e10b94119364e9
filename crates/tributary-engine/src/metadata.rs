//! Applied metadata state
//!
//! [`AppliedState`] is the single owned copy of a node's metadata. Only the
//! applier mutates it, one command record at a time and strictly in offset
//! order. [`AppliedState::apply`] is a pure step: it decides the record's
//! terminal status, mutates the state on success and returns the side
//! effects (queries to start or stop) for the applier to run afterwards.
//!
//! ## Idempotence
//!
//! Records are delivered at least once. A record whose offset was already
//! applied is reported as [`ApplyStep::Redelivered`]. A *new* offset that
//! carries an already-processed statement id (a resubmission after a timeout)
//! is consumed without mutating anything and re-reports the earlier status.
//! The set of processed ids is bounded; since every node evicts in log order
//! the decision is the same everywhere.

use crate::query::QueryLaunch;
use crate::statement::{QueryPlan, Statement, StatementClassifier};
use crate::status::{CommandOutcome, CommandStatus};
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use tributary_core::config::{SINK_PARTITIONS, SINK_REPLICAS};
use tributary_core::{
    CommandRecord, EntityDescriptor, EntityKind, QueryDescriptor, QueryStatus, RegisteredTopic,
    SerializationFormat, ServerConfig, StatementId,
};

/// Default number of statement ids remembered for deduplication.
pub const DEFAULT_PROCESSED_CAPACITY: usize = 10_000;

/// Read-only view of the applied metadata, published after every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataSnapshot {
    pub entities: BTreeMap<String, EntityDescriptor>,
    pub queries: BTreeMap<String, QueryDescriptor>,
    pub topics: BTreeMap<String, RegisteredTopic>,
    /// Offset of the last applied record, `None` before the first.
    pub last_applied: Option<u64>,
}

impl MetadataSnapshot {
    /// Look up a stream or table. Names are matched case-insensitively.
    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities
            .get(name)
            .or_else(|| self.entities.get(&name.to_uppercase()))
    }

    pub fn entities_of(&self, kind: EntityKind) -> Vec<&EntityDescriptor> {
        self.entities.values().filter(|e| e.kind == kind).collect()
    }

    pub fn query(&self, id: &str) -> Option<&QueryDescriptor> {
        self.queries
            .get(id)
            .or_else(|| self.queries.get(&id.to_uppercase()))
    }

    pub fn topic(&self, name: &str) -> Option<&RegisteredTopic> {
        self.topics
            .get(name)
            .or_else(|| self.topics.get(&name.to_uppercase()))
    }

    /// Ids of running queries that read from and write into `entity`.
    pub fn queries_touching(&self, entity: &str) -> (Vec<String>, Vec<String>) {
        let running = || {
            self.queries
                .values()
                .filter(|q| q.status == QueryStatus::Running)
        };
        let readers = running()
            .filter(|q| q.reads(entity))
            .map(|q| q.id.clone())
            .collect();
        let writers = running()
            .filter(|q| q.writes(entity))
            .map(|q| q.id.clone())
            .collect();
        (readers, writers)
    }
}

/// Side effect of an applied record, run by the applier after the state changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartQuery(QueryLaunch),
    StopQuery {
        query_id: String,
    },
}

/// Outcome of offering one record to [`AppliedState::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyStep {
    /// The record was processed; the state may have changed.
    Processed {
        status: CommandStatus,
        effects: Vec<Effect>,
    },
    /// A new offset carrying an already-processed statement id.
    Duplicate { status: CommandStatus },
    /// The offset was applied before. Carries the status if still remembered.
    Redelivered { status: Option<CommandStatus> },
    /// The record is ahead of the next expected offset.
    Gap { expected: u64, found: u64 },
}

/// Bounded memory of processed statement ids.
///
/// Lookups use `peek` so the eviction order is insertion order.
struct ProcessedStatements {
    statuses: LruCache<StatementId, CommandStatus>,
}

impl ProcessedStatements {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            statuses: LruCache::new(capacity),
        }
    }

    fn get(&self, id: &StatementId) -> Option<&CommandStatus> {
        self.statuses.peek(id)
    }

    fn insert(&mut self, id: StatementId, status: CommandStatus) {
        self.statuses.put(id, status);
    }
}

/// The node-local metadata owned by the applier.
pub struct AppliedState {
    metadata: MetadataSnapshot,
    /// Plans of persistent queries, kept so they can be restarted after replay.
    plans: BTreeMap<String, QueryPlan>,
    next_offset: u64,
    query_counter: u64,
    processed: ProcessedStatements,
}

impl Default for AppliedState {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESSED_CAPACITY)
    }
}

impl AppliedState {
    pub fn new(processed_capacity: usize) -> Self {
        Self {
            metadata: MetadataSnapshot::default(),
            plans: BTreeMap::new(),
            next_offset: 0,
            query_counter: 0,
            processed: ProcessedStatements::new(processed_capacity),
        }
    }

    pub fn metadata(&self) -> &MetadataSnapshot {
        &self.metadata
    }

    /// Offset the next applied record must carry.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn processed_status(&self, id: &StatementId) -> Option<&CommandStatus> {
        self.processed.get(id)
    }

    /// Persistent queries that should be executing on this node.
    pub fn running_queries(&self) -> Vec<QueryLaunch> {
        self.metadata
            .queries
            .values()
            .filter(|q| q.status == QueryStatus::Running)
            .filter_map(|q| {
                let plan = self.plans.get(&q.id)?;
                Some(QueryLaunch {
                    descriptor: q.clone(),
                    plan: plan.clone(),
                    sink_topic: self.sink_topic(q),
                })
            })
            .collect()
    }

    fn sink_topic(&self, query: &QueryDescriptor) -> Option<String> {
        let sink = query.sink.as_deref()?;
        self.metadata.entities.get(sink).map(|e| e.topic.clone())
    }

    /// Record a local execution failure. Returns false if the query is unknown
    /// or no longer running.
    pub fn mark_query_failed(&mut self, query_id: &str, message: &str) -> bool {
        match self.metadata.queries.get_mut(query_id) {
            Some(query) if query.status == QueryStatus::Running => {
                query.status = QueryStatus::Errored;
                query.error = Some(message.to_string());
                true
            }
            _ => false,
        }
    }

    /// Apply one record.
    pub fn apply(
        &mut self,
        record: &CommandRecord,
        classifier: &dyn StatementClassifier,
        config: &ServerConfig,
    ) -> ApplyStep {
        if record.offset < self.next_offset {
            return ApplyStep::Redelivered {
                status: self.processed.get(&record.statement_id).cloned(),
            };
        }
        if record.offset > self.next_offset {
            return ApplyStep::Gap {
                expected: self.next_offset,
                found: record.offset,
            };
        }

        if let Some(status) = self.processed.get(&record.statement_id).cloned() {
            self.advance(record.offset);
            return ApplyStep::Duplicate { status };
        }

        let (status, effects) = match self.execute(record, classifier, config) {
            Ok((message, query_id, effects)) => (
                CommandStatus::Applied(CommandOutcome {
                    offset: record.offset,
                    message,
                    query_id,
                }),
                effects,
            ),
            Err(reason) => (
                CommandStatus::Failed {
                    offset: record.offset,
                    reason,
                },
                Vec::new(),
            ),
        };

        self.processed
            .insert(record.statement_id.clone(), status.clone());
        self.advance(record.offset);
        ApplyStep::Processed { status, effects }
    }

    fn advance(&mut self, offset: u64) {
        self.next_offset = offset + 1;
        self.metadata.last_applied = Some(offset);
    }

    /// Validate and mutate. `Err` carries the user-facing failure reason and
    /// guarantees nothing was changed.
    fn execute(
        &mut self,
        record: &CommandRecord,
        classifier: &dyn StatementClassifier,
        config: &ServerConfig,
    ) -> std::result::Result<(String, Option<String>, Vec<Effect>), String> {
        let statement = classifier
            .classify(&record.statement_text)
            .map_err(|e| e.to_string())?;

        match statement {
            Statement::CreateSource(create) => {
                self.ensure_absent(create.kind, &create.name)?;
                if let Some(key) = &create.key {
                    if !create.columns.iter().any(|c| c.name.eq_ignore_ascii_case(key)) {
                        return Err(format!(
                            "Invalid key column '{}': it is not a column of {}",
                            key, create.name
                        ));
                    }
                }
                let partitions: u32 = narrow(
                    "partitions",
                    int_property(&create.properties, "partitions", || {
                        resolve_u64(config, &record.properties, SINK_PARTITIONS)
                    })?,
                )?;
                let replicas: u16 = narrow(
                    "replicas",
                    int_property(&create.properties, "replicas", || {
                        resolve_u64(config, &record.properties, SINK_REPLICAS)
                    })?,
                )?;
                let message = format!("{} created", title(create.kind));
                self.metadata.entities.insert(
                    create.name.clone(),
                    EntityDescriptor {
                        name: create.name,
                        kind: create.kind,
                        schema: create.columns,
                        topic: create.topic,
                        format: create.format,
                        key_column: create.key,
                        partitions,
                        replicas,
                        written_by: None,
                    },
                );
                Ok((message, None, Vec::new()))
            }

            Statement::CreateAsSelect(create) => {
                self.ensure_absent(create.kind, &create.name)?;
                let plan = classifier
                    .plan(&create.select, &self.metadata)
                    .map_err(|e| e.to_string())?;
                let source = self
                    .metadata
                    .entity(&plan.source)
                    .cloned()
                    .ok_or_else(|| format!("Source {} does not exist.", plan.source))?;

                let partitions: u32 = narrow(
                    "partitions",
                    int_property(&create.properties, "partitions", || {
                        resolve_u64(config, &record.properties, SINK_PARTITIONS)
                    })?,
                )?;
                let replicas: u16 = narrow(
                    "replicas",
                    int_property(&create.properties, "replicas", || {
                        resolve_u64(config, &record.properties, SINK_REPLICAS)
                    })?,
                )?;
                let format = match create.properties.get("value_format") {
                    Some(f) => f
                        .parse::<SerializationFormat>()
                        .map_err(|e| e.to_string())?,
                    None => source.format,
                };
                let topic = create
                    .properties
                    .get("kafka_topic")
                    .cloned()
                    .unwrap_or_else(|| create.name.clone());

                let query_id = format!(
                    "{}_{}_{}",
                    create.kind.query_prefix(),
                    create.name,
                    self.query_counter
                );
                self.query_counter += 1;

                self.metadata.entities.insert(
                    create.name.clone(),
                    EntityDescriptor {
                        name: create.name.clone(),
                        kind: create.kind,
                        schema: plan.output_schema.clone(),
                        topic,
                        format,
                        key_column: None,
                        partitions,
                        replicas,
                        written_by: Some(query_id.clone()),
                    },
                );
                let descriptor = QueryDescriptor {
                    id: query_id.clone(),
                    statement_text: record.statement_text.clone(),
                    sink: Some(create.name),
                    sources: vec![plan.source.clone()],
                    status: QueryStatus::Running,
                    error: None,
                    row_limit: None,
                    idle_timeout_ms: None,
                    properties: record.properties.clone(),
                };
                self.metadata
                    .queries
                    .insert(query_id.clone(), descriptor.clone());
                self.plans.insert(query_id.clone(), plan.clone());
                let sink_topic = self.sink_topic(&descriptor);

                Ok((
                    format!("{} created and running", title(create.kind)),
                    Some(query_id),
                    vec![Effect::StartQuery(QueryLaunch {
                        descriptor,
                        plan,
                        sink_topic,
                    })],
                ))
            }

            Statement::DropSource { kind, name } => {
                let existing = self
                    .metadata
                    .entity(&name)
                    .ok_or_else(|| format!("Source {} does not exist.", name))?;
                if existing.kind != kind {
                    return Err(format!(
                        "Incompatible data source type is {}, but statement was DROP {}",
                        existing.kind, kind
                    ));
                }
                let (readers, writers) = self.metadata.queries_touching(&name);
                if !readers.is_empty() || !writers.is_empty() {
                    return Err(format!(
                        "Cannot drop {name}. The following queries read from this source: [{}] \
                         and write into this source: [{}]. You need to terminate them before \
                         dropping {name}.",
                        readers.join(", "),
                        writers.join(", "),
                    ));
                }
                let key = existing.name.clone();
                self.metadata.entities.remove(&key);
                Ok((format!("Source {} was dropped.", key), None, Vec::new()))
            }

            Statement::RegisterTopic(register) => {
                if self.metadata.topics.contains_key(&register.name) {
                    return Err(format!(
                        "A topic with name '{}' already exists in the registry.",
                        register.name
                    ));
                }
                self.metadata.topics.insert(
                    register.name.clone(),
                    RegisteredTopic {
                        name: register.name,
                        kafka_topic: register.kafka_topic,
                        format: register.format,
                    },
                );
                Ok(("Topic registered".to_string(), None, Vec::new()))
            }

            Statement::DropTopic { name } => {
                if self.metadata.topics.remove(&name).is_none() {
                    return Err(format!("No topic with name {} was registered.", name));
                }
                Ok((format!("Topic {} was dropped.", name), None, Vec::new()))
            }

            Statement::Terminate { query_id } => {
                let query = self
                    .metadata
                    .queries
                    .remove(&query_id)
                    .ok_or_else(|| format!("Unknown queryId: {}", query_id))?;
                self.plans.remove(&query_id);
                if let Some(sink) = query.sink.as_deref() {
                    if let Some(entity) = self.metadata.entities.get_mut(sink) {
                        if entity.written_by.as_deref() == Some(query_id.as_str()) {
                            entity.written_by = None;
                        }
                    }
                }
                Ok((
                    "Query terminated.".to_string(),
                    None,
                    vec![Effect::StopQuery { query_id }],
                ))
            }

            other => Err(format!(
                "Statement cannot be applied from the command log: {:?}",
                other.kind()
            )),
        }
    }

    fn ensure_absent(&self, kind: EntityKind, name: &str) -> std::result::Result<(), String> {
        if self.metadata.entity(name).is_some() {
            let noun = kind.to_string().to_lowercase();
            return Err(format!(
                "Cannot add {noun} '{name}': A {noun} with the same name already exists"
            ));
        }
        Ok(())
    }
}

fn title(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Stream => "Stream",
        EntityKind::Table => "Table",
    }
}

fn resolve_u64(
    config: &ServerConfig,
    session: &BTreeMap<String, String>,
    name: &str,
) -> std::result::Result<u64, String> {
    config
        .resolve_u64_with(session, name)
        .map_err(|e| e.to_string())
}

/// An integer `WITH` property, falling back to the resolved configuration.
fn int_property(
    properties: &BTreeMap<String, String>,
    key: &str,
    fallback: impl FnOnce() -> std::result::Result<u64, String>,
) -> std::result::Result<u64, String> {
    match properties.get(key) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(format!("Invalid value for {}: '{}'", key.to_uppercase(), raw)),
        },
        None => fallback(),
    }
}

/// Fit a resolved count into the width the descriptor stores.
fn narrow<T: TryFrom<u64>>(key: &str, value: u64) -> std::result::Result<T, String> {
    T::try_from(value)
        .map_err(|_| format!("Invalid value for {}: '{}'", key.to_uppercase(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::SqlClassifier;
    use tributary_core::{PendingCommand, ColumnType};

    const ORDERS: &str = "CREATE STREAM ORDERS (ORDERTIME BIGINT, ORDERID VARCHAR, ITEMID VARCHAR, \
                          ORDERUNITS DOUBLE) WITH (kafka_topic='orders_topic', value_format='json');";

    fn record(offset: u64, id: &str, text: &str) -> CommandRecord {
        PendingCommand::new(StatementId::from(id), text).into_record(offset)
    }

    fn apply_all(state: &mut AppliedState, texts: &[&str]) -> Vec<ApplyStep> {
        let config = ServerConfig::new();
        let start = state.next_offset();
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let offset = start + i as u64;
                state.apply(&record(offset, &format!("id-{}", offset), text), &SqlClassifier, &config)
            })
            .collect()
    }

    fn message(step: &ApplyStep) -> String {
        match step {
            ApplyStep::Processed {
                status: CommandStatus::Applied(outcome),
                ..
            } => outcome.message.clone(),
            ApplyStep::Processed {
                status: CommandStatus::Failed { reason, .. },
                ..
            } => format!("FAILED: {}", reason),
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_create_terminate_drop_scenario() {
        let mut state = AppliedState::default();
        let steps = apply_all(
            &mut state,
            &[
                ORDERS,
                "CREATE STREAM RESULT_0 AS SELECT ITEMID, ORDERUNITS FROM ORDERS;",
                "TERMINATE CSAS_RESULT_0_0;",
                "DROP STREAM RESULT_0;",
            ],
        );
        let messages: Vec<String> = steps.iter().map(message).collect();
        assert_eq!(
            messages,
            vec![
                "Stream created",
                "Stream created and running",
                "Query terminated.",
                "Source RESULT_0 was dropped.",
            ]
        );
        match &steps[1] {
            ApplyStep::Processed { status, effects } => {
                assert!(matches!(
                    status,
                    CommandStatus::Applied(CommandOutcome { query_id: Some(id), .. }) if id == "CSAS_RESULT_0_0"
                ));
                assert!(matches!(
                    &effects[0],
                    Effect::StartQuery(launch)
                        if launch.descriptor.id == "CSAS_RESULT_0_0"
                            && launch.sink_topic.as_deref() == Some("RESULT_0")
                ));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(state.metadata().entity("RESULT_0").is_none());
        assert!(state.metadata().queries.is_empty());
        assert_eq!(state.metadata().last_applied, Some(3));
    }

    #[test]
    fn test_duplicate_name_fails_without_mutation() {
        let mut state = AppliedState::default();
        let steps = apply_all(
            &mut state,
            &[ORDERS, "CREATE STREAM orders (A INT) WITH (kafka_topic='other');"],
        );
        assert_eq!(
            message(&steps[1]),
            "FAILED: Cannot add stream 'ORDERS': A stream with the same name already exists"
        );
        assert_eq!(state.metadata().entity("ORDERS").unwrap().topic, "orders_topic");
        assert_eq!(state.next_offset(), 2);
    }

    #[test]
    fn test_drop_blocked_by_running_query() {
        let mut state = AppliedState::default();
        let steps = apply_all(
            &mut state,
            &[
                ORDERS,
                "CREATE STREAM BIG AS SELECT * FROM ORDERS WHERE ORDERUNITS > 5;",
                "DROP STREAM ORDERS;",
                "DROP STREAM BIG;",
            ],
        );
        assert_eq!(
            message(&steps[2]),
            "FAILED: Cannot drop ORDERS. The following queries read from this source: [CSAS_BIG_0] \
             and write into this source: []. You need to terminate them before dropping ORDERS."
        );
        assert!(message(&steps[3]).contains("write into this source: [CSAS_BIG_0]"));
        assert!(state.metadata().entity("ORDERS").is_some());
    }

    #[test]
    fn test_errored_query_does_not_block_drop() {
        let mut state = AppliedState::default();
        apply_all(
            &mut state,
            &[ORDERS, "CREATE STREAM BIG AS SELECT * FROM ORDERS;"],
        );
        assert!(state.mark_query_failed("CSAS_BIG_0", "boom"));
        assert!(!state.mark_query_failed("CSAS_BIG_0", "boom again"));
        assert!(state.running_queries().is_empty());

        let steps = apply_all(&mut state, &["DROP STREAM ORDERS;"]);
        assert_eq!(message(&steps[0]), "Source ORDERS was dropped.");
    }

    #[test]
    fn test_unknown_query_and_wrong_kind() {
        let mut state = AppliedState::default();
        let steps = apply_all(
            &mut state,
            &[ORDERS, "TERMINATE CSAS_NOPE_7;", "DROP TABLE ORDERS;", "DROP STREAM MISSING;"],
        );
        assert_eq!(message(&steps[1]), "FAILED: Unknown queryId: CSAS_NOPE_7");
        assert_eq!(
            message(&steps[2]),
            "FAILED: Incompatible data source type is STREAM, but statement was DROP TABLE"
        );
        assert_eq!(message(&steps[3]), "FAILED: Source MISSING does not exist.");
    }

    #[test]
    fn test_query_counter_advances_in_log_order() {
        let mut state = AppliedState::default();
        let steps = apply_all(
            &mut state,
            &[
                ORDERS,
                "CREATE STREAM A AS SELECT * FROM ORDERS;",
                "CREATE TABLE B AS SELECT * FROM NOPE;",
                "CREATE TABLE C AS SELECT ORDERID FROM ORDERS;",
            ],
        );
        assert!(message(&steps[2]).starts_with("FAILED"));
        assert!(state.metadata().query("CSAS_A_0").is_some());
        assert!(state.metadata().query("CTAS_C_1").is_some());
        let c = state.metadata().entity("C").unwrap();
        assert_eq!(c.schema.len(), 1);
        assert_eq!(c.schema[0].column_type, ColumnType::String);
    }

    #[test]
    fn test_sink_partitions_from_record_properties() {
        let mut state = AppliedState::default();
        let config = ServerConfig::new();
        state.apply(&record(0, "a", ORDERS), &SqlClassifier, &config);

        let mut properties = BTreeMap::new();
        properties.insert(SINK_PARTITIONS.to_string(), "7".to_string());
        let csas = PendingCommand::new(StatementId::from("b"), "CREATE STREAM S AS SELECT * FROM ORDERS;")
            .with_properties(properties)
            .into_record(1);
        state.apply(&csas, &SqlClassifier, &config);

        let sink = state.metadata().entity("S").unwrap();
        assert_eq!(sink.partitions, 7);
        assert_eq!(sink.replicas, 1);
        assert_eq!(sink.written_by.as_deref(), Some("CSAS_S_0"));
    }

    #[test]
    fn test_out_of_range_counts_are_rejected() {
        let mut state = AppliedState::default();
        let steps = apply_all(
            &mut state,
            &[
                ORDERS,
                "CREATE STREAM S WITH (replicas=65536) AS SELECT * FROM ORDERS;",
                "CREATE STREAM T (A INT) WITH (kafka_topic='t', value_format='json', partitions=4294967296);",
            ],
        );
        assert_eq!(message(&steps[1]), "FAILED: Invalid value for REPLICAS: '65536'");
        assert_eq!(message(&steps[2]), "FAILED: Invalid value for PARTITIONS: '4294967296'");
        assert!(state.metadata().entity("S").is_none());
        assert!(state.metadata().entity("T").is_none());
        assert!(state.metadata().queries.is_empty());

        // A failed CSAS does not consume a query id.
        let steps = apply_all(
            &mut state,
            &["CREATE STREAM S WITH (replicas=3) AS SELECT * FROM ORDERS;"],
        );
        assert_eq!(message(&steps[0]), "Stream created and running");
        assert_eq!(state.metadata().entity("S").unwrap().replicas, 3);
        assert!(state.metadata().query("CSAS_S_0").is_some());
    }

    #[test]
    fn test_redelivery_duplicate_and_gap() {
        let mut state = AppliedState::default();
        let config = ServerConfig::new();
        let first = record(0, "same", ORDERS);
        let status = match state.apply(&first, &SqlClassifier, &config) {
            ApplyStep::Processed { status, .. } => status,
            other => panic!("unexpected: {:?}", other),
        };

        assert_eq!(
            state.apply(&first, &SqlClassifier, &config),
            ApplyStep::Redelivered {
                status: Some(status.clone())
            }
        );

        // Same statement id at a new offset: consumed, not re-executed.
        let resubmitted = record(1, "same", ORDERS);
        assert_eq!(
            state.apply(&resubmitted, &SqlClassifier, &config),
            ApplyStep::Duplicate { status }
        );
        assert_eq!(state.next_offset(), 2);

        assert_eq!(
            state.apply(&record(5, "later", ORDERS), &SqlClassifier, &config),
            ApplyStep::Gap {
                expected: 2,
                found: 5
            }
        );
    }

    #[test]
    fn test_registered_topics() {
        let mut state = AppliedState::default();
        let steps = apply_all(
            &mut state,
            &[
                "REGISTER TOPIC foo WITH (kafka_topic='foo', value_format='csv');",
                "REGISTER TOPIC foo WITH (kafka_topic='foo', value_format='json');",
                "DROP TOPIC foo;",
                "DROP TOPIC foo;",
            ],
        );
        assert_eq!(message(&steps[0]), "Topic registered");
        assert!(message(&steps[1]).starts_with("FAILED: A topic with name 'FOO'"));
        assert_eq!(message(&steps[2]), "Topic FOO was dropped.");
        assert!(message(&steps[3]).starts_with("FAILED"));
    }

    #[test]
    fn test_processed_set_is_bounded() {
        let mut state = AppliedState::new(2);
        apply_all(
            &mut state,
            &[
                "REGISTER TOPIC a WITH (kafka_topic='a', value_format='json');",
                "REGISTER TOPIC b WITH (kafka_topic='b', value_format='json');",
                "REGISTER TOPIC c WITH (kafka_topic='c', value_format='json');",
            ],
        );
        assert!(state.processed_status(&StatementId::from("id-0")).is_none());
        assert!(state.processed_status(&StatementId::from("id-2")).is_some());
    }
}
