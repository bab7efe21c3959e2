//! Typebot, EvolutionBot, Dify and Flowise share one set of sub-operations
//! and differ only in path prefix, parameter names and connection fields.

use serde_json::json;

use crate::route::{Fanout, RequestSpec, RouteDef};
use crate::shape::{BodyShape, Condition, Source};

/// Static description of one bot integration.
#[derive(Debug, Clone, Copy)]
pub struct BotFlavor {
    pub operation: &'static str,
    pub selector: &'static str,
    pub id_param: &'static str,
    pub connection: Connection,
    pub has_bot_type: bool,
    pub subs: BotSubOperations,
    pub paths: BotPaths,
}

/// How the bot backend is addressed in create and update bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// `url` and `typebot` flow name.
    Typebot,
    /// `apiUrl` and `apiKey` (from `apiKeyBot`).
    ApiEndpoint,
}

#[derive(Debug, Clone, Copy)]
pub struct BotSubOperations {
    pub create: &'static str,
    pub find: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
    pub start: &'static str,
    pub fetch_sessions: &'static str,
    pub change_status: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct BotPaths {
    pub create: &'static str,
    pub fetch: &'static str,
    pub find: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
    pub start: &'static str,
    pub fetch_sessions: &'static str,
    pub change_status: &'static str,
}

macro_rules! bot_flavor {
    (
        operation: $op:literal,
        selector: $selector:literal,
        prefix: $prefix:literal,
        suffix: $suffix:literal,
        id: $id:literal,
        connection: $conn:expr,
        bot_type: $bot_type:expr $(,)?
    ) => {
        BotFlavor {
            operation: $op,
            selector: $selector,
            id_param: $id,
            connection: $conn,
            has_bot_type: $bot_type,
            subs: BotSubOperations {
                create: concat!("create", $suffix),
                find: concat!("find", $suffix),
                update: concat!("update", $suffix),
                delete: concat!("delete", $suffix),
                start: concat!("start", $suffix),
                fetch_sessions: concat!("fetchSessions", $suffix),
                change_status: concat!("changeStatus", $suffix),
            },
            paths: BotPaths {
                create: concat!("/", $prefix, "/create/{{instanceName}}"),
                fetch: concat!("/", $prefix, "/fetch/{{", $id, "}}/{{instanceName}}"),
                find: concat!("/", $prefix, "/find/{{instanceName}}"),
                update: concat!("/", $prefix, "/update/{{", $id, "}}/{{instanceName}}"),
                delete: concat!("/", $prefix, "/delete/{{", $id, "}}/{{instanceName}}"),
                start: concat!("/", $prefix, "/start/{{instanceName}}"),
                fetch_sessions: concat!("/", $prefix, "/fetchSessions/{{", $id, "}}/{{instanceName}}"),
                change_status: concat!("/", $prefix, "/changeStatus/{{instanceName}}"),
            },
        }
    };
}

pub const TYPEBOT: BotFlavor = bot_flavor! {
    operation: "typebot",
    selector: "resourceForTypebot",
    prefix: "typebot",
    suffix: "Typebot",
    id: "typebotId",
    connection: Connection::Typebot,
    bot_type: false,
};

pub const EVOLUTION_BOT: BotFlavor = bot_flavor! {
    operation: "evolutionBot",
    selector: "resourceForEvolutionBot",
    prefix: "evolutionBot",
    suffix: "EvolutionBot",
    id: "evolutionBotId",
    connection: Connection::ApiEndpoint,
    bot_type: false,
};

pub const DIFY: BotFlavor = bot_flavor! {
    operation: "difyBot",
    selector: "resourceForDifyBot",
    prefix: "dify",
    suffix: "Dify",
    id: "difyBotId",
    connection: Connection::ApiEndpoint,
    bot_type: true,
};

pub const FLOWISE: BotFlavor = bot_flavor! {
    operation: "flowiseBot",
    selector: "resourceForFlowiseBot",
    prefix: "flowise",
    suffix: "Flowise",
    id: "flowiseBotId",
    connection: Connection::ApiEndpoint,
    bot_type: false,
};

pub const ALL: [BotFlavor; 4] = [TYPEBOT, EVOLUTION_BOT, DIFY, FLOWISE];

impl BotFlavor {
    /// The full fan-out over this flavor's seven sub-operations.
    pub fn route(&self) -> Fanout {
        let p = &self.paths;
        Fanout::on(self.selector)
            .branch(self.subs.create, RequestSpec::post(p.create).body(self.settings_body()))
            .branch(
                self.subs.find,
                RouteDef::if_truthy(self.id_param, RequestSpec::get(p.fetch), RequestSpec::get(p.find)),
            )
            .branch(self.subs.update, RequestSpec::put(p.update).body(self.settings_body()))
            .branch(self.subs.delete, RequestSpec::delete(p.delete))
            .branch(self.subs.start, RequestSpec::post(p.start).body(self.start_body()))
            .branch(self.subs.fetch_sessions, RequestSpec::get(p.fetch_sessions))
            .branch(
                self.subs.change_status,
                RequestSpec::post(p.change_status).body(
                    BodyShape::new()
                        .required("remoteJid", "remoteJid")
                        .required("status", "status"),
                ),
            )
    }

    fn connection_fields(&self) -> BodyShape {
        match self.connection {
            Connection::Typebot => BodyShape::new().required("url", "url").required("typebot", "typebot"),
            Connection::ApiEndpoint => BodyShape::new()
                .required("apiUrl", "apiUrl")
                .required("apiKey", "apiKeyBot"),
        }
    }

    /// Body shared by create and update.
    fn settings_body(&self) -> BodyShape {
        let mut shape = BodyShape::new().literal("enabled", json!(true));
        if self.has_bot_type {
            shape = shape.required("botType", "botType");
        }
        let keyword = || Condition::Equals("triggerType", "keyword");
        shape
            .extend(self.connection_fields())
            .required("triggerType", "triggerType")
            .field_if("triggerOperator", Source::Required("triggerOperator"), keyword())
            .field_if("triggerValue", Source::Required("triggerValue"), keyword())
            .or_falsy("keywordFinish", "keywordFinish", json!(""))
            .or_falsy("delayMessage", "delayMessage", json!(1000))
            .or_falsy("unknownMessage", "unknownMessage", json!("Mensagem não reconhecida"))
            .or_falsy("listeningFromMe", "listeningFromMe", json!(false))
            .or_falsy("stopBotFromMe", "stopBotFromMe", json!(false))
            .or_falsy("keepOpen", "keepOpen", json!(false))
            .or_falsy("debounceTime", "debounceTime", json!(0))
    }

    fn start_body(&self) -> BodyShape {
        let shape = match self.connection {
            Connection::Typebot => self.connection_fields(),
            Connection::ApiEndpoint => BodyShape::new(),
        };
        shape
            .required("remoteJid", "remoteJid")
            .or_default("startSession", "startSession", json!(false))
            .field_if(
                "variables",
                Source::Records {
                    list: "variables_display.metadataValues",
                    fields: vec![("name", "name"), ("value", "value")],
                },
                Condition::NonEmptyList("variables_display.metadataValues"),
            )
    }
}
