//! End-to-end scenarios driven through a client session on one node.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tributary_core::{EntityDescriptor, EntityKind, QueryDescriptor, RegisteredTopic, Version};
use tributary_engine::{
    ClientSession, CommandOutcome, EndReason, EngineError, FunctionDescriptor, FunctionKind,
    InMemoryEngine, LocalEndpoint, Node, NodeConfig, ResultStream, ServerEndpoint, ServerInfo,
    StatementResult,
};
use tributary_log::InMemoryCommandLog;

const ORDERS: &str = "CREATE STREAM ORDERS (ORDERTIME BIGINT, ORDERID VARCHAR, ITEMID VARCHAR, \
                      ORDERUNITS DOUBLE) WITH (kafka_topic='orders_topic', value_format='json');";

async fn start(config: NodeConfig) -> (Arc<Node>, InMemoryEngine) {
    let engine = InMemoryEngine::new();
    let node = Node::start(
        config,
        Arc::new(InMemoryCommandLog::default()),
        Arc::new(engine.clone()),
    )
    .await
    .unwrap();
    (Arc::new(node), engine)
}

async fn connect(node: &Arc<Node>) -> ClientSession {
    let endpoint: Arc<dyn ServerEndpoint> = Arc::new(LocalEndpoint::new(node.clone()));
    ClientSession::connect(endpoint, &Version::current(), None)
        .await
        .unwrap()
}

async fn command(session: &mut ClientSession, text: &str) -> CommandOutcome {
    match session.execute(text).await.unwrap() {
        StatementResult::Command(outcome) => outcome,
        other => panic!("expected a command outcome, got {:?}", other),
    }
}

async fn select(session: &mut ClientSession, text: &str) -> ResultStream {
    match session.execute(text).await.unwrap() {
        StatementResult::Streaming(stream) => stream,
        other => panic!("expected a result stream, got {:?}", other),
    }
}

fn order(id: &str, item: &str, units: f64) -> Vec<serde_json::Value> {
    vec![json!(1_700_000_000_000u64), json!(id), json!(item), json!(units)]
}

#[tokio::test]
async fn test_create_run_terminate_drop() {
    let (node, engine) = start(NodeConfig::default()).await;
    let mut session = connect(&node).await;

    assert_eq!(command(&mut session, ORDERS).await.message, "Stream created");

    let created = command(
        &mut session,
        "CREATE STREAM RESULT_0 AS SELECT ITEMID, ORDERUNITS FROM ORDERS;",
    )
    .await;
    assert_eq!(created.message, "Stream created and running");
    assert_eq!(created.query_id.as_deref(), Some("CSAS_RESULT_0_0"));
    assert!(node.queries().is_running("CSAS_RESULT_0_0").await);

    engine.produce("orders_topic", order("o1", "item_1", 3.0)).await;
    engine.produce("orders_topic", order("o2", "item_2", 5.5)).await;
    let written = engine
        .wait_for_rows("RESULT_0", 2, Duration::from_secs(5))
        .await;
    assert_eq!(
        written,
        vec![
            vec![json!("item_1"), json!(3.0)],
            vec![json!("item_2"), json!(5.5)],
        ]
    );

    let blocked = session.execute("DROP STREAM RESULT_0;").await.unwrap_err();
    match blocked {
        EngineError::ValidationFailed(reason) => {
            assert!(reason.starts_with("Cannot drop RESULT_0."), "{}", reason);
            assert!(reason.contains("CSAS_RESULT_0_0"), "{}", reason);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(
        command(&mut session, "TERMINATE CSAS_RESULT_0_0;").await.message,
        "Query terminated."
    );
    assert!(!node.queries().is_running("CSAS_RESULT_0_0").await);
    assert_eq!(
        command(&mut session, "DROP STREAM RESULT_0;").await.message,
        "Source RESULT_0 was dropped."
    );

    match session.execute("LIST STREAMS;").await.unwrap() {
        StatementResult::Streams(streams) => {
            let names: Vec<&str> = streams.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["ORDERS"]);
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(session.history().len(), 6);
    assert!(!session.history()[2].succeeded);
}

#[tokio::test]
async fn test_describe_follows_create_and_drop() {
    let (node, _engine) = start(NodeConfig::default()).await;
    let mut session = connect(&node).await;
    command(&mut session, ORDERS).await;

    match session.execute("DESCRIBE ORDERS;").await.unwrap() {
        StatementResult::Entity(entity) => {
            let columns: Vec<&str> = entity.schema.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(columns, vec!["ORDERTIME", "ORDERID", "ITEMID", "ORDERUNITS"]);
            assert_eq!(entity.kind, EntityKind::Stream);
            assert_eq!(entity.topic, "orders_topic");
        }
        other => panic!("unexpected: {:?}", other),
    }

    command(&mut session, "DROP STREAM ORDERS;").await;
    let err = session.execute("DESCRIBE ORDERS;").await.unwrap_err();
    assert!(matches!(err, EngineError::EntityNotFound(ref name) if name == "ORDERS"));
    assert_eq!(
        err.to_string(),
        "Could not find STREAM/TABLE 'ORDERS' in the metastore"
    );
}

#[tokio::test]
async fn test_set_unset_messages() {
    let (node, _engine) = start(NodeConfig::default()).await;
    let mut session = connect(&node).await;

    let messages = [
        "SET 'auto.offset.reset'='earliest';",
        "SET 'auto.offset.reset'='latest';",
        "UNSET 'auto.offset.reset';",
        "UNSET 'auto.offset.reset';",
    ];
    let mut rendered = Vec::new();
    for text in messages {
        match session.execute(text).await.unwrap() {
            StatementResult::PropertySet(outcome) => rendered.push(outcome.to_string()),
            StatementResult::PropertyUnset(outcome) => rendered.push(outcome.to_string()),
            other => panic!("unexpected: {:?}", other),
        }
    }
    assert_eq!(
        rendered,
        vec![
            "Successfully changed local property 'auto.offset.reset' to 'earliest'. Use the UNSET command to revert your change.",
            "Successfully changed local property 'auto.offset.reset' from 'earliest' to 'latest'.",
            "Successfully unset local property 'auto.offset.reset' (value was 'latest').",
            "Local property 'auto.offset.reset' was not set; nothing to unset.",
        ]
    );
    assert!(session.config().session_overrides().is_empty());

    let err = session.execute("SET 'no.such.property'='1';").await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn test_row_limit_and_idle_timeout_are_distinguishable() {
    let (node, engine) = start(NodeConfig::default()).await;
    let mut session = connect(&node).await;
    command(&mut session, ORDERS).await;
    for i in 0..3 {
        engine
            .produce("orders_topic", order(&format!("o{}", i), "item", i as f64))
            .await;
    }
    session
        .execute("SET 'auto.offset.reset'='earliest';")
        .await
        .unwrap();
    session
        .execute("SET 'query.idle.timeout.ms'='200';")
        .await
        .unwrap();

    session.execute("SET 'query.row.limit'='2';").await.unwrap();
    let stream = select(&mut session, "SELECT ORDERID FROM ORDERS;").await;
    let (rows, reason) = stream.collect().await;
    assert_eq!(rows, vec![vec![json!("o0")], vec![json!("o1")]]);
    assert_eq!(reason, EndReason::LimitReached);

    session.execute("SET 'query.row.limit'='10';").await.unwrap();
    let stream = select(&mut session, "SELECT ORDERID FROM ORDERS;").await;
    let (rows, reason) = stream.collect().await;
    assert_eq!(rows.len(), 3);
    assert_eq!(reason, EndReason::IdleTimeout);
    assert!(reason.is_normal());
}

#[tokio::test]
async fn test_cancelled_stream_releases_query() {
    let (node, _engine) = start(NodeConfig::default()).await;
    let mut session = connect(&node).await;
    command(&mut session, ORDERS).await;

    let mut stream = select(&mut session, "SELECT * FROM ORDERS;").await;
    let query_id = stream.query_id().to_string();
    assert!(node.queries().is_running(&query_id).await);

    let cancel = stream.cancel_token();
    let consumer = tokio::spawn(async move {
        let row = stream.next().await;
        (row, stream.end_reason().cloned())
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let (row, reason) = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_none());
    assert_eq!(reason, Some(EndReason::Cancelled));
    assert!(!node.queries().is_running(&query_id).await);
}

#[tokio::test]
async fn test_lists_and_function_describe() {
    let (node, _engine) = start(NodeConfig::default()).await;
    let mut session = connect(&node).await;
    command(
        &mut session,
        "REGISTER TOPIC PAGEVIEWS WITH (kafka_topic='pageviews', value_format='json');",
    )
    .await;

    match session.execute("LIST REGISTERED TOPICS;").await.unwrap() {
        StatementResult::Topics(topics) => {
            let names: Vec<&str> = topics.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec!["PAGEVIEWS", "_TRIBUTARY_COMMANDS"]);
        }
        other => panic!("unexpected: {:?}", other),
    }
    match session.execute("DESCRIBE TOPIC _tributary_commands;").await.unwrap() {
        StatementResult::Topic(topic) => assert_eq!(topic.kafka_topic, "_tributary_commands"),
        other => panic!("unexpected: {:?}", other),
    }

    match session.execute("LIST FUNCTIONS;").await.unwrap() {
        StatementResult::Functions(functions) => {
            assert!(functions.contains(&("TOPK".to_string(), FunctionKind::Aggregate)));
            assert!(functions.contains(&("SUBSTRING".to_string(), FunctionKind::Scalar)));
        }
        other => panic!("unexpected: {:?}", other),
    }
    match session.execute("DESCRIBE FUNCTION substring;").await.unwrap() {
        StatementResult::Function(function) => {
            assert_eq!(function.name, "SUBSTRING");
            assert_eq!(function.variants.len(), 2);
        }
        other => panic!("unexpected: {:?}", other),
    }
    let err = session
        .execute("DESCRIBE FUNCTION foobar;")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Can't find any functions with the name 'foobar'"
    );

    match session.execute("LIST PROPERTIES;").await.unwrap() {
        StatementResult::Properties(listing) => {
            let names: Vec<&str> = listing.iter().map(|p| p.name.as_str()).collect();
            let mut sorted = names.clone();
            sorted.sort();
            assert_eq!(names, sorted);
            let password = listing
                .iter()
                .find(|p| p.name == "ssl.keystore.password")
                .unwrap();
            assert_eq!(password.value, None);
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_client_rejected_by_server_minimum() {
    let config = NodeConfig {
        min_client_version: Some("9.0.0".to_string()),
        ..NodeConfig::default()
    };
    let (node, _engine) = start(config).await;
    let endpoint: Arc<dyn ServerEndpoint> = Arc::new(LocalEndpoint::new(node));

    let err = ClientSession::connect(endpoint, &Version::new(0, 1, 0), None)
        .await
        .unwrap_err();
    match &err {
        EngineError::VersionIncompatible { message, .. } => {
            assert_eq!(message, "Minimum supported client version: 9.0.0. Please upgrade.");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(err
        .to_string()
        .starts_with("This CLI version no longer supported"));
}

#[tokio::test]
async fn test_server_older_than_client_minimum() {
    let (node, _engine) = start(NodeConfig::default()).await;
    let endpoint: Arc<dyn ServerEndpoint> = Arc::new(LocalEndpoint::new(node));

    let err = ClientSession::connect(
        endpoint,
        &Version::current(),
        Some(&Version::new(99, 0, 0)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::VersionIncompatible { .. }));
}

/// Endpoint whose transport never answers.
struct UnreachableEndpoint;

#[async_trait]
impl ServerEndpoint for UnreachableEndpoint {
    async fn server_info(&self) -> tributary_engine::Result<ServerInfo> {
        Err(EngineError::NotReady("connection refused".to_string()))
    }

    async fn check_client_version(&self, _client: &Version) -> tributary_engine::Result<()> {
        Ok(())
    }

    async fn submit_statement(
        &self,
        _session_id: &str,
        _statement_text: &str,
        _overrides: &BTreeMap<String, String>,
    ) -> tributary_engine::Result<CommandOutcome> {
        Err(EngineError::NotReady("connection refused".to_string()))
    }

    async fn stream_query(
        &self,
        _statement_text: &str,
        _overrides: &BTreeMap<String, String>,
    ) -> tributary_engine::Result<ResultStream> {
        Err(EngineError::NotReady("connection refused".to_string()))
    }

    async fn list_entities(&self, _kind: EntityKind) -> tributary_engine::Result<Vec<EntityDescriptor>> {
        Ok(Vec::new())
    }

    async fn list_queries(&self) -> tributary_engine::Result<Vec<QueryDescriptor>> {
        Ok(Vec::new())
    }

    async fn list_topics(&self) -> tributary_engine::Result<Vec<RegisteredTopic>> {
        Ok(Vec::new())
    }

    async fn list_functions(&self) -> tributary_engine::Result<Vec<(String, FunctionKind)>> {
        Ok(Vec::new())
    }

    async fn describe_entity(&self, name: &str) -> tributary_engine::Result<EntityDescriptor> {
        Err(EngineError::EntityNotFound(name.to_string()))
    }

    async fn describe_topic(&self, name: &str) -> tributary_engine::Result<RegisteredTopic> {
        Err(EngineError::TopicNotFound(name.to_string()))
    }

    async fn describe_function(&self, name: &str) -> tributary_engine::Result<FunctionDescriptor> {
        Err(EngineError::FunctionNotFound(name.to_string()))
    }

    async fn close_session(&self, _session_id: &str) -> tributary_engine::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unreachable_server() {
    let err = ClientSession::connect(Arc::new(UnreachableEndpoint), &Version::current(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unreachable(_)));
    assert!(err
        .to_string()
        .starts_with("Remote server address may not be valid"));
}

#[tokio::test]
async fn test_closed_sessions_release_their_submitters() {
    let (node, _engine) = start(NodeConfig::default()).await;
    let local = Arc::new(LocalEndpoint::new(node.clone()));
    let endpoint: Arc<dyn ServerEndpoint> = local.clone();

    let mut first = ClientSession::connect(endpoint.clone(), &Version::current(), None)
        .await
        .unwrap();
    let mut second = ClientSession::connect(endpoint, &Version::current(), None)
        .await
        .unwrap();
    // Reads and local statements do not register a submitter.
    first.execute("LIST STREAMS;").await.unwrap();
    assert_eq!(local.open_sessions().await, 0);

    command(&mut first, ORDERS).await;
    command(
        &mut second,
        "REGISTER TOPIC AUDIT WITH (kafka_topic='audit', value_format='json');",
    )
    .await;
    assert_eq!(local.open_sessions().await, 2);

    first.close().await.unwrap();
    assert_eq!(local.open_sessions().await, 1);
    second.close().await.unwrap();
    assert_eq!(local.open_sessions().await, 0);

    // The applied state outlives the sessions that created it.
    let mut third = connect(&node).await;
    match third.execute("DESCRIBE ORDERS;").await.unwrap() {
        StatementResult::Entity(entity) => assert_eq!(entity.name, "ORDERS"),
        other => panic!("unexpected: {:?}", other),
    }
}
