// tests/dispatch_test.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use evolution_node::config::NodeSettings;
use evolution_node::credentials::{CredentialStore, Credentials, SecretsCredentialStore};
use evolution_node::descriptor::{API_KEY_HEADER, CONTENT_TYPE_HEADER, HttpMethod, RequestDescriptor};
use evolution_node::dispatcher::Dispatcher;
use evolution_node::error::{DispatchError, TransportError};
use evolution_node::message::Message;
use evolution_node::node::{EvolutionApiNode, NodeContext, NodeError, NodeType};
use evolution_node::params::ParameterBag;
use evolution_node::route::RouteDef;
use evolution_node::routes::CHATWOOT_DEFAULT_LOGO;
use evolution_node::secret::{MemorySecretsManager, SecretsManager};
use evolution_node::selector::{Resource, RouteKey};
use evolution_node::transport::{ReqwestTransport, Transport};
use mockito::{Matcher, Server};
use serde_json::{Value, json};
use url::Url;

const SERVER: &str = "https://evo.example.com";

fn creds() -> Credentials {
    Credentials::new(format!("{SERVER}/"), "KEY")
}

/// Transport double that records every request it is handed.
#[derive(Default)]
struct MockTransport {
    calls: Mutex<Vec<RequestDescriptor>>,
    reply: Value,
}

impl MockTransport {
    fn replying(reply: Value) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply,
        }
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }
}

/// Transport double whose every call fails with one HTTP status.
struct FailingTransport {
    status: u16,
    body: &'static str,
    calls: AtomicUsize,
}

impl FailingTransport {
    fn new(status: u16, body: &'static str) -> Self {
        Self {
            status,
            body,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn execute(&self, _request: &RequestDescriptor) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Status {
            status: self.status,
            body: self.body.to_string(),
        })
    }
}

/// A bag satisfying every required parameter of every route.
fn full_bag() -> ParameterBag {
    ParameterBag::from_value(json!({
        "instanceName": "shop1",
        "presence": "available",
        "remoteJid": "5511999999999",
        "messageText": "hi",
        "media": "https://cdn.example.com/a.png",
        "sticker": "https://cdn.example.com/s.webp",
        "caption": "Lunch?",
        "templateName": "welcome",
        "type": "text",
        "content": "status text",
        "chatwootAccountId": 7,
        "chatwootToken": "cw-token",
        "chatwootUrl": "https://chat.example.com",
        "url": "https://typebot.example.com",
        "typebot": "onboarding",
        "apiUrl": "https://bot.example.com",
        "apiKeyBot": "bot-key",
        "botType": "chatBot",
        "triggerType": "all",
        "status": "opened",
        "typebotId": "b1",
        "evolutionBotId": "b1",
        "difyBotId": "b1",
        "flowiseBotId": "b1"
    }))
}

fn expected_routes() -> Vec<(Resource, &'static str, Option<&'static str>, HttpMethod, String)> {
    use HttpMethod::*;
    use Resource::*;

    let mut table = vec![
        (Instance, "create-basic", None, Post, "/instance/create".to_string()),
        (Instance, "connect", None, Get, "/instance/connect/shop1".into()),
        (Instance, "restart", None, Post, "/instance/restart/shop1".into()),
        (Instance, "logout", None, Delete, "/instance/logout/shop1".into()),
        (Instance, "delete", None, Delete, "/instance/delete/shop1".into()),
        (Instance, "fetch", None, Get, "/instance/fetchInstances?instanceName=shop1".into()),
        (Instance, "set-presence", None, Post, "/instance/setPresence/shop1".into()),
        (Instance, "settings", None, Post, "/settings/set/shop1".into()),
        (Instance, "proxy", Some("setProxy"), Post, "/proxy/set/shop1".into()),
        (Instance, "proxy", Some("findProxy"), Get, "/proxy/find/shop1".into()),
        (Message, "sendText", None, Post, "/message/sendText/shop1".into()),
        (Message, "sendImage", None, Post, "/message/sendMedia/shop1".into()),
        (Message, "sendSticker", None, Post, "/message/sendSticker/shop1".into()),
        (Message, "sendVideo", None, Post, "/message/sendMedia/shop1".into()),
        (Message, "sendAudio", None, Post, "/message/sendWhatsAppAudio/shop1".into()),
        (Message, "sendDocument", None, Post, "/message/sendMedia/shop1".into()),
        (Message, "sendPoll", None, Post, "/message/sendPoll/shop1".into()),
        (Message, "sendTemplate", None, Post, "/message/sendTemplate/shop1".into()),
        (Message, "sendStatus", None, Post, "/message/sendStatus/shop1".into()),
        (Event, "webhook", Some("setWebhook"), Post, "/webhook/set/shop1".into()),
        (Event, "webhook", Some("findWebhook"), Get, "/webhook/find/shop1".into()),
        (Event, "rabbitMQ", Some("setRabbitMQ"), Post, "/rabbitmq/set/shop1".into()),
        (Event, "rabbitMQ", Some("findRabbitMQ"), Get, "/rabbitmq/find/shop1".into()),
        (Integration, "chatwoot", Some("setChatwoot"), Post, "/chatwoot/set/shop1".into()),
        (Integration, "chatwoot", Some("findChatwoot"), Get, "/chatwoot/find/shop1".into()),
    ];

    let bots = [
        ("typebot", "typebot", "Typebot"),
        ("evolutionBot", "evolutionBot", "EvolutionBot"),
        ("difyBot", "dify", "Dify"),
        ("flowiseBot", "flowise", "Flowise"),
    ];
    for (op, prefix, suffix) in bots {
        let sub = |verb: &str| -> &'static str { Box::leak(format!("{verb}{suffix}").into_boxed_str()) };
        table.extend([
            (Integration, op, Some(sub("create")), Post, format!("/{prefix}/create/shop1")),
            (Integration, op, Some(sub("find")), Get, format!("/{prefix}/fetch/b1/shop1")),
            (Integration, op, Some(sub("update")), Put, format!("/{prefix}/update/b1/shop1")),
            (Integration, op, Some(sub("delete")), Delete, format!("/{prefix}/delete/b1/shop1")),
            (Integration, op, Some(sub("start")), Post, format!("/{prefix}/start/shop1")),
            (Integration, op, Some(sub("fetchSessions")), Get, format!("/{prefix}/fetchSessions/b1/shop1")),
            (Integration, op, Some(sub("changeStatus")), Post, format!("/{prefix}/changeStatus/shop1")),
        ]);
    }
    table
}

#[test]
fn every_declared_route_resolves_with_minimal_parameters() {
    let dispatcher = Dispatcher::new();
    let bag = full_bag();
    let table = expected_routes();

    for (resource, operation, sub, method, path) in &table {
        let mut key = RouteKey::new(*resource, *operation);
        if let Some(sub) = sub {
            key = key.with_sub(*sub);
        }
        let req = dispatcher
            .resolve_key(&key, &bag, &creds())
            .unwrap_or_else(|e| panic!("{key}: {e}"));
        assert_eq!(req.method, *method, "{key}");
        assert_eq!(req.url, format!("{SERVER}{path}"), "{key}");
        assert_eq!(req.header(API_KEY_HEADER), Some("KEY"), "{key}");
        assert_eq!(req.header(CONTENT_TYPE_HEADER).is_some(), req.body.is_some(), "{key}");
    }

    // the table above covers the whole registry
    let registry = dispatcher.registry();
    let declared: usize = registry
        .operations()
        .iter()
        .flat_map(|(resource, ops)| ops.iter().map(move |op| (*resource, *op)))
        .map(|(resource, op)| match registry.lookup(resource, op) {
            Some((_, RouteDef::Fanout(f))) => f.sub_operations().count(),
            _ => 1,
        })
        .sum();
    assert_eq!(declared, table.len());
}

#[test]
fn create_basic_end_to_end() {
    let params = ParameterBag::new().with("instanceName", "shop1");
    let req = Dispatcher::new()
        .resolve(Resource::Instance, "create-basic", &params, &creds())
        .unwrap();

    assert_eq!(req.method, HttpMethod::Post);
    assert_eq!(req.url, "https://evo.example.com/instance/create");
    assert_eq!(req.header(CONTENT_TYPE_HEADER), Some("application/json"));
    assert_eq!(req.header(API_KEY_HEADER), Some("KEY"));
    assert_eq!(req.headers.len(), 2);
    assert_eq!(
        req.body,
        Some(json!({"instanceName": "shop1", "integration": "WHATSAPP-BAILEYS"}))
    );
}

#[test]
fn send_text_end_to_end() {
    let params = ParameterBag::from_value(json!({
        "instanceName": "shop1",
        "remoteJid": "55119",
        "messageText": "hi",
        "mentionsEveryOne": false,
        "delay": 0
    }));
    let req = Dispatcher::new()
        .resolve(Resource::Message, "sendText", &params, &creds())
        .unwrap();
    assert_eq!(req.url, "https://evo.example.com/message/sendText/shop1");
    assert_eq!(
        req.body,
        Some(json!({"number": "55119", "text": "hi", "mentionsEveryOne": false, "delay": 0}))
    );
}

#[test]
fn typebot_find_switches_on_id() {
    let dispatcher = Dispatcher::new();
    let key = RouteKey::new(Resource::Integration, "typebot").with_sub("findTypebot");

    let params = ParameterBag::new().with("instanceName", "shop1");
    let req = dispatcher.resolve_key(&key, &params, &creds()).unwrap();
    assert_eq!(req.method, HttpMethod::Get);
    assert_eq!(req.url, "https://evo.example.com/typebot/find/shop1");
    assert!(req.body.is_none());

    let params = params.with("typebotId", "abc");
    let req = dispatcher.resolve_key(&key, &params, &creds()).unwrap();
    assert_eq!(req.url, "https://evo.example.com/typebot/fetch/abc/shop1");

    // selector parameter works the same as an explicit sub-operation
    let params = ParameterBag::new()
        .with("instanceName", "shop1")
        .with("resourceForTypebot", "findTypebot");
    let req = dispatcher
        .resolve(Resource::Integration, "typebot", &params, &creds())
        .unwrap();
    assert_eq!(req.url, "https://evo.example.com/typebot/find/shop1");
}

#[test]
fn proxy_group_absent_and_sparse() {
    const PROXY_KEYS: [&str; 5] = ["proxyHost", "proxyPort", "proxyProtocol", "proxyUsername", "proxyPassword"];
    let dispatcher = Dispatcher::new();

    let bare = ParameterBag::new().with("instanceName", "shop1");
    let body = dispatcher
        .resolve(Resource::Instance, "create-basic", &bare, &creds())
        .unwrap()
        .body
        .unwrap();
    for key in PROXY_KEYS {
        assert!(body.get(key).is_none(), "{key}");
    }

    let sparse = bare.with(
        "options_Create_instance",
        json!({"proxy": {"proxySettings": {"proxyHost": "10.0.0.2"}}}),
    );
    let body = dispatcher
        .resolve(Resource::Instance, "create-basic", &sparse, &creds())
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["proxyHost"], json!("10.0.0.2"));
    assert_eq!(body["proxyPort"], json!("1234"));
    assert_eq!(body["proxyProtocol"], json!(""));
    assert_eq!(body["proxyUsername"], json!(""));
    assert_eq!(body["proxyPassword"], json!(""));
    assert!(body.get("webhook").is_none());
    assert!(body.get("chatwootAccountId").is_none());
}

#[test]
fn create_basic_with_every_group() {
    let params = ParameterBag::from_value(json!({
        "instanceName": "shop1",
        "token": "t0k",
        "number": "5511",
        "options_Create_instance": {
            "instanceSettings": {"settings": {"rejectCall": true, "msgCall": "busy"}},
            "proxy": {"proxySettings": {"proxyPort": 3128}},
            "webhook": {"webhookSettings": {"webhookUrl": "https://hooks.example.com", "webhookEvents": ["MESSAGES_UPSERT"]}},
            "rabbitmq": {"rabbitmqSettings": {"rabbitmqEnabled": true}},
            "chatwoot": {"chatwootSettings": {"chatwootAccountId": 3, "chatwootSignMsg": true}}
        }
    }));
    let body = Dispatcher::new()
        .resolve(Resource::Instance, "create-basic", &params, &creds())
        .unwrap()
        .body
        .unwrap();

    assert_eq!(body["token"], json!("t0k"));
    assert_eq!(body["number"], json!("5511"));
    assert_eq!(body["rejectCall"], json!(true));
    assert_eq!(body["msgCall"], json!("busy"));
    assert_eq!(body["proxyPort"], json!("3128"));
    assert_eq!(
        body["webhook"],
        json!({"url": "https://hooks.example.com", "byEvents": false, "base64": false, "events": ["MESSAGES_UPSERT"]})
    );
    assert_eq!(body["rabbitmq"], json!({"enabled": true, "events": []}));
    assert_eq!(body["chatwootAccountId"], json!(3));
    assert_eq!(body["chatwootSignMsg"], json!(true));
    assert_eq!(body["chatwootDaysLimitImportMessages"], json!(0));
    assert_eq!(body["chatwootLogo"], json!(""));
}

#[test]
fn fetch_filter_query_string() {
    let dispatcher = Dispatcher::new();
    let req = dispatcher
        .resolve(Resource::Instance, "fetch", &ParameterBag::new(), &creds())
        .unwrap();
    assert_eq!(req.url, "https://evo.example.com/instance/fetchInstances");

    let params = ParameterBag::new().with("instanceName", "shop1");
    let req = dispatcher
        .resolve(Resource::Instance, "fetch", &params, &creds())
        .unwrap();
    assert_eq!(req.url.matches('?').count(), 1);
    assert!(req.url.ends_with("?instanceName=shop1"));
}

#[test]
fn poll_values_projection() {
    let dispatcher = Dispatcher::new();
    let base = ParameterBag::new()
        .with("instanceName", "shop1")
        .with("remoteJid", "5511")
        .with("caption", "Lunch?");

    let params = base.clone().with(
        "options_display",
        json!({"metadataValues": [{"optionValue": "A"}, {"optionValue": "B"}]}),
    );
    let body = dispatcher
        .resolve(Resource::Message, "sendPoll", &params, &creds())
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["values"], json!(["A", "B"]));
    assert_eq!(body["name"], json!("Lunch?"));
    assert_eq!(body["selectableCount"], json!(1));

    let params = base.with("options_display", json!({"metadataValues": []}));
    let body = dispatcher
        .resolve(Resource::Message, "sendPoll", &params, &creds())
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["values"], json!([]));
}

#[test]
fn template_message_contract() {
    let params = ParameterBag::from_value(json!({
        "instanceName": "shop1",
        "remoteJid": "5511",
        "templateName": "order_ready",
        "templateparams_display": {"metadataValues": [{"typeValue": "text", "textValue": "Ana"}]}
    }));
    let body = Dispatcher::new()
        .resolve(Resource::Message, "sendTemplate", &params, &creds())
        .unwrap()
        .body
        .unwrap();
    assert_eq!(
        body,
        json!({
            "number": "5511",
            "name": "order_ready",
            "language": "pt_BR",
            "components": [{"type": "body", "parameters": [{"type": "text", "text": "Ana"}]}],
            "mentionsEveryOne": false
        })
    );
}

#[test]
fn status_and_chatwoot_defaults() {
    let dispatcher = Dispatcher::new();
    let params = ParameterBag::from_value(json!({"instanceName": "shop1", "type": "text", "content": "Open today"}));
    let body = dispatcher
        .resolve(Resource::Message, "sendStories", &params, &creds())
        .unwrap()
        .body
        .unwrap();
    assert_eq!(
        body,
        json!({"type": "text", "content": "Open today", "caption": "", "backgroundColor": "#000000", "font": 1, "allContacts": true})
    );

    let params = ParameterBag::from_value(json!({
        "instanceName": "shop1",
        "resourceForChatwoot": "setChatwoot",
        "chatwootAccountId": 1,
        "chatwootToken": "t",
        "chatwootUrl": "https://chat.example.com"
    }));
    let body = dispatcher
        .resolve(Resource::Integration, "chatwoot", &params, &creds())
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["signDelimiter"], json!("\n"));
    assert_eq!(body["logo"], json!(CHATWOOT_DEFAULT_LOGO));
    assert_eq!(body["enabled"], json!(false));
}

#[test]
fn bot_create_keyword_trigger_and_dify_bot_type() {
    let dispatcher = Dispatcher::new();
    let key = RouteKey::new(Resource::Integration, "difyBot").with_sub("createDify");
    let params = ParameterBag::from_value(json!({
        "instanceName": "shop1",
        "botType": "agent",
        "apiUrl": "https://dify.example.com/v1",
        "apiKeyBot": "app-123",
        "triggerType": "keyword",
        "triggerOperator": "equals",
        "triggerValue": "menu",
        "delayMessage": 0
    }));
    let body = dispatcher.resolve_key(&key, &params, &creds()).unwrap().body.unwrap();
    assert_eq!(
        body,
        json!({
            "enabled": true,
            "botType": "agent",
            "apiUrl": "https://dify.example.com/v1",
            "apiKey": "app-123",
            "triggerType": "keyword",
            "triggerOperator": "equals",
            "triggerValue": "menu",
            "keywordFinish": "",
            "delayMessage": 1000,
            "unknownMessage": "Mensagem não reconhecida",
            "listeningFromMe": false,
            "stopBotFromMe": false,
            "keepOpen": false,
            "debounceTime": 0
        })
    );

    let missing = params.clone().with("triggerValue", Value::Null);
    assert!(matches!(
        dispatcher.resolve_key(&key, &missing, &creds()),
        Err(DispatchError::MissingParameter(p)) if p == "triggerValue"
    ));
}

#[test]
fn typebot_start_variables_only_when_present() {
    let dispatcher = Dispatcher::new();
    let key = RouteKey::new(Resource::Integration, "typebot").with_sub("startTypebot");
    let params = ParameterBag::from_value(json!({
        "instanceName": "shop1",
        "url": "https://typebot.example.com",
        "typebot": "onboarding",
        "remoteJid": "5511",
        "variables_display": {"metadataValues": []}
    }));
    let body = dispatcher.resolve_key(&key, &params, &creds()).unwrap().body.unwrap();
    assert!(body.get("variables").is_none());
    assert_eq!(body["startSession"], json!(false));

    let params = params.with(
        "variables_display",
        json!({"metadataValues": [{"name": "pushName", "value": "Ana"}]}),
    );
    let body = dispatcher.resolve_key(&key, &params, &creds()).unwrap().body.unwrap();
    assert_eq!(body["variables"], json!([{"name": "pushName", "value": "Ana"}]));
}

#[test]
fn resolve_is_idempotent() {
    let dispatcher = Dispatcher::new();
    let params = full_bag().with(
        "options_Create_instance",
        json!({"webhook": {"webhookSettings": {"webhookUrl": "https://hooks.example.com"}}}),
    );
    let a = dispatcher
        .resolve(Resource::Instance, "create-basic", &params, &creds())
        .unwrap();
    let b = dispatcher
        .resolve(Resource::Instance, "create-basic", &params, &creds())
        .unwrap();
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
}

#[test]
fn aliases_match_canonical_names() {
    let dispatcher = Dispatcher::new();
    let bag = full_bag();
    let pairs = [
        (Resource::Instance, "instance-basic", "create-basic"),
        (Resource::Instance, "instance-connect", "connect"),
        (Resource::Instance, "fetch-instances", "fetch"),
        (Resource::Instance, "setPresence", "set-presence"),
        (Resource::Instance, "instanceSettings", "settings"),
        (Resource::Message, "sendDocumento", "sendDocument"),
        (Resource::Message, "sendStories", "sendStatus"),
    ];
    for (resource, alias, canonical) in pairs {
        assert_eq!(
            dispatcher.resolve(resource, alias, &bag, &creds()).unwrap(),
            dispatcher.resolve(resource, canonical, &bag, &creds()).unwrap(),
            "{alias}"
        );
    }
}

#[tokio::test]
async fn unknown_sub_operation_never_reaches_transport() {
    let transport = MockTransport::default();
    let dispatcher = Dispatcher::new();

    let params = ParameterBag::new()
        .with("instanceName", "shop1")
        .with("resourceForWebhook", "deleteWebhook");
    let key = RouteKey::new(Resource::Event, "webhook");
    let err = dispatcher.invoke(&key, &params, &creds(), &transport).await.unwrap_err();
    match err {
        DispatchError::UnknownSubOperation { got, .. } => assert_eq!(got, "deleteWebhook"),
        other => panic!("unexpected error: {other}"),
    }

    let key = RouteKey::new(Resource::Integration, "flowiseBot").with_sub("launchFlowise");
    let err = dispatcher.invoke(&key, &params, &creds(), &transport).await.unwrap_err();
    assert!(err.is_local());
    assert_eq!(err.to_string(), "unrecognized flowiseBot operation: launchFlowise");

    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn local_errors_never_reach_transport() {
    let transport = MockTransport::default();
    let dispatcher = Dispatcher::new();

    let key = RouteKey::new(Resource::Message, "sendText");
    let params = ParameterBag::new().with("instanceName", "shop1").with("remoteJid", "5511");
    assert!(matches!(
        dispatcher.invoke(&key, &params, &creds(), &transport).await,
        Err(DispatchError::MissingParameter(p)) if p == "messageText"
    ));

    let key = RouteKey::new(Resource::Event, "webhook");
    assert!(matches!(
        dispatcher.invoke(&key, &params, &creds(), &transport).await,
        Err(DispatchError::MissingParameter(p)) if p == "resourceForWebhook"
    ));

    let key = RouteKey::new(Resource::Message, "sendFax");
    assert!(matches!(
        dispatcher.invoke(&key, &params, &creds(), &transport).await,
        Err(DispatchError::UnknownOperation { .. })
    ));

    let store = SecretsCredentialStore::new(SecretsManager(MemorySecretsManager::new()));
    let key = RouteKey::new(Resource::Instance, "connect");
    assert!(matches!(
        dispatcher.execute(&key, &params, &store, "evolution", &transport).await,
        Err(DispatchError::CredentialUnavailable(r)) if r == "evolution"
    ));

    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn execute_resolves_credentials_and_shapes_records() {
    let transport = MockTransport::replying(json!([{"instance": {"instanceName": "shop1"}}, {"instance": {"instanceName": "shop2"}}]));
    let store = SecretsCredentialStore::new(SecretsManager(MemorySecretsManager::with_secrets([
        ("EVOLUTION_PROD_SERVER_URL", "https://prod.example.com/"),
        ("EVOLUTION_PROD_APIKEY", "prod-key"),
    ])));
    assert_eq!(
        store.credentials("evolution-prod").await.unwrap().server_url(),
        "https://prod.example.com"
    );

    let records = Dispatcher::new()
        .execute(
            &RouteKey::new(Resource::Instance, "fetch"),
            &ParameterBag::new(),
            &store,
            "evolution-prod",
            &transport,
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    let calls = transport.calls.lock().unwrap();
    assert_eq!(calls[0].url, "https://prod.example.com/instance/fetchInstances");
    assert_eq!(calls[0].header(API_KEY_HEADER), Some("prod-key"));
}

#[tokio::test]
async fn concurrent_invocations_are_independent() {
    let transport = Arc::new(MockTransport::replying(json!({"ok": true})));
    let mut handles = Vec::new();
    for i in 0..8 {
        let transport = transport.clone();
        handles.push(tokio::spawn(async move {
            let params = ParameterBag::new().with("instanceName", format!("shop{i}"));
            Dispatcher::new()
                .invoke(&RouteKey::new(Resource::Instance, "connect"), &params, &creds(), transport.as_ref())
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), vec![json!({"ok": true})]);
    }

    let mut urls: Vec<String> = transport.calls.lock().unwrap().iter().map(|r| r.url.clone()).collect();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), 8);
}

#[tokio::test]
async fn transport_status_surfaces_unchanged() {
    let transport = FailingTransport::new(502, "x");
    let key = RouteKey::new(Resource::Instance, "connect");
    let params = ParameterBag::new().with("instanceName", "shop1");

    let err = Dispatcher::new()
        .invoke(&key, &params, &creds(), &transport)
        .await
        .unwrap_err();
    assert!(!err.is_local());
    match err {
        DispatchError::TransportFailure(TransportError::Status { status, body }) => {
            assert_eq!(status, 502);
            assert_eq!(body, "x");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn node_reports_transport_status_as_execution_failure() {
    let transport = Arc::new(FailingTransport::new(502, "bad gateway"));
    let secrets = SecretsManager(MemorySecretsManager::with_secrets([
        ("EVOLUTION_SERVER_URL", SERVER),
        ("EVOLUTION_APIKEY", "KEY"),
    ]));
    let mut ctx = NodeContext::new(secrets, transport.clone(), NodeSettings::default());
    let node = EvolutionApiNode::new(Resource::Instance, "restart")
        .with_parameters(ParameterBag::new().with("instanceName", "shop1"));

    let err = node
        .process(Message::new("m1", json!({}), None), &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        NodeError::ExecutionFailed("transport failure: server answered 502: bad gateway".into())
    );
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn path_values_cannot_redirect_the_request() {
    let dispatcher = Dispatcher::new();

    let key = RouteKey::new(Resource::Integration, "typebot").with_sub("deleteTypebot");
    let params = ParameterBag::new()
        .with("instanceName", "shop1")
        .with("typebotId", "../../instance/delete/victim#");
    let req = dispatcher.resolve_key(&key, &params, &creds()).unwrap();
    assert_eq!(req.method, HttpMethod::Delete);
    let parsed = Url::parse(&req.url).unwrap();
    assert_eq!(
        parsed.path(),
        "/typebot/delete/..%2F..%2Finstance%2Fdelete%2Fvictim%23/shop1"
    );
    assert!(parsed.fragment().is_none());

    let params = ParameterBag::new().with("instanceName", "shop#1");
    let req = dispatcher
        .resolve(Resource::Instance, "delete", &params, &creds())
        .unwrap();
    assert_eq!(Url::parse(&req.url).unwrap().path(), "/instance/delete/shop%231");

    let params = ParameterBag::new().with("instanceName", "..");
    assert!(matches!(
        dispatcher.resolve(Resource::Instance, "delete", &params, &creds()),
        Err(DispatchError::InvalidParameter { name, .. }) if name == "instanceName"
    ));
}

#[tokio::test]
async fn reqwest_transport_against_mock_server() {
    let mut server = Server::new_async().await;
    let fetch = server
        .mock("GET", "/instance/fetchInstances")
        .match_query(Matcher::UrlEncoded("instanceName".into(), "shop1".into()))
        .match_header("apikey", "local-key")
        .match_header("content-type", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"instance":{"instanceName":"shop1","status":"open"}}]"#)
        .create_async()
        .await;
    let send = server
        .mock("POST", "/message/sendText/shop1")
        .match_header("apikey", "local-key")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "number": "5511",
            "text": "hi",
            "mentionsEveryOne": false,
            "delay": 0
        })))
        .with_status(201)
        .with_body(r#"{"key":{"id":"M1"}}"#)
        .create_async()
        .await;

    let transport = ReqwestTransport::new(Duration::from_secs(5), "evolution-node-test").unwrap();
    let credentials = Credentials::new(server.url(), "local-key");
    let dispatcher = Dispatcher::new();

    let records = dispatcher
        .invoke(
            &RouteKey::new(Resource::Instance, "fetch"),
            &ParameterBag::new().with("instanceName", "shop1"),
            &credentials,
            &transport,
        )
        .await
        .unwrap();
    assert_eq!(records, vec![json!({"instance": {"instanceName": "shop1", "status": "open"}})]);

    let params = ParameterBag::new()
        .with("instanceName", "shop1")
        .with("remoteJid", "5511")
        .with("messageText", "hi");
    let records = dispatcher
        .invoke(&RouteKey::new(Resource::Message, "sendText"), &params, &credentials, &transport)
        .await
        .unwrap();
    assert_eq!(records, vec![json!({"key": {"id": "M1"}})]);

    fetch.assert_async().await;
    send.assert_async().await;
}
