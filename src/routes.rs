//! The built-in Evolution API route table.

use serde_json::json;

use crate::bots;
use crate::error::RegistryError;
use crate::registry::{Registry, RegistryBuilder};
use crate::route::{Fanout, RequestSpec};
use crate::selector::Resource;
use crate::shape::{BodyShape, Placement, Source};

pub const CHATWOOT_DEFAULT_LOGO: &str =
    "https://github.com/user-attachments/assets/4d1e9cd6-377a-4383-820a-9a97e6cfbb63";

pub fn default_registry() -> Result<Registry, RegistryError> {
    let builder = Registry::builder();
    let builder = instance_routes(builder);
    let builder = message_routes(builder);
    let builder = event_routes(builder);
    integration_routes(builder).build()
}

fn instance_routes(b: RegistryBuilder) -> RegistryBuilder {
    use Resource::Instance;

    b.route_with_aliases(
        Instance,
        "create-basic",
        &["instance-basic"],
        RequestSpec::post("/instance/create").body(create_instance_body()),
    )
    .route_with_aliases(
        Instance,
        "connect",
        &["instance-connect"],
        RequestSpec::get("/instance/connect/{{instanceName}}"),
    )
    .route_with_aliases(
        Instance,
        "restart",
        &["restart-instance"],
        RequestSpec::post("/instance/restart/{{instanceName}}"),
    )
    .route_with_aliases(
        Instance,
        "logout",
        &["logout-instance"],
        RequestSpec::delete("/instance/logout/{{instanceName}}"),
    )
    .route_with_aliases(
        Instance,
        "delete",
        &["delete-instance"],
        RequestSpec::delete("/instance/delete/{{instanceName}}"),
    )
    .route_with_aliases(
        Instance,
        "fetch",
        &["fetch-instances"],
        RequestSpec::get("/instance/fetchInstances").filter("instanceName"),
    )
    .route_with_aliases(
        Instance,
        "set-presence",
        &["setPresence"],
        RequestSpec::post("/instance/setPresence/{{instanceName}}")
            .body(BodyShape::new().required("presence", "presence")),
    )
    .route_with_aliases(
        Instance,
        "settings",
        &["instanceSettings"],
        RequestSpec::post("/settings/set/{{instanceName}}").body(
            BodyShape::new()
                .or_default("rejectCall", "rejectCall", json!(false))
                .or_falsy("msgCall", "msgCall", json!(""))
                .or_default("groupsIgnore", "groupsIgnore", json!(false))
                .or_default("alwaysOnline", "alwaysOnline", json!(false))
                .or_default("readMessages", "readMessages", json!(false))
                .or_default("syncFullHistory", "syncFullHistory", json!(false))
                .or_default("readStatus", "readStatus", json!(false)),
        ),
    )
    .route(
        Instance,
        "proxy",
        Fanout::on("resourceForProxy")
            .branch(
                "setProxy",
                RequestSpec::post("/proxy/set/{{instanceName}}").body(
                    // "1234" lands on host here, and on port in the create-instance proxy group.
                    BodyShape::new()
                        .or_falsy("enabled", "enabled", json!(""))
                        .or_falsy("host", "proxyHost", json!("1234"))
                        .or_falsy("port", "proxyPort", json!(""))
                        .or_falsy("protocol", "proxyProtocol", json!(""))
                        .or_falsy("username", "proxyUsername", json!(""))
                        .or_falsy("password", "proxyPassword", json!("")),
                ),
            )
            .branch("findProxy", RequestSpec::get("/proxy/find/{{instanceName}}")),
    )
}

fn create_instance_body() -> BodyShape {
    BodyShape::new()
        .required("instanceName", "instanceName")
        .literal("integration", json!("WHATSAPP-BAILEYS"))
        .when_truthy("token", "token")
        .when_truthy("number", "number")
        .group(
            "options_Create_instance.instanceSettings.settings",
            Placement::Spread,
            BodyShape::new(),
        )
        .group(
            "options_Create_instance.proxy.proxySettings",
            Placement::Flatten,
            BodyShape::new()
                .or_falsy("proxyHost", "proxyHost", json!(""))
                .field("proxyPort", Source::Stringified("proxyPort", json!("1234")))
                .or_falsy("proxyProtocol", "proxyProtocol", json!(""))
                .or_falsy("proxyUsername", "proxyUsername", json!(""))
                .or_falsy("proxyPassword", "proxyPassword", json!("")),
        )
        .group(
            "options_Create_instance.webhook.webhookSettings",
            Placement::Nest("webhook"),
            BodyShape::new()
                .or_falsy("url", "webhookUrl", json!(""))
                .or_falsy("byEvents", "webhookByEvents", json!(false))
                .or_falsy("base64", "webhookBase64", json!(false))
                .or_falsy("events", "webhookEvents", json!([])),
        )
        .group(
            "options_Create_instance.rabbitmq.rabbitmqSettings",
            Placement::Nest("rabbitmq"),
            BodyShape::new()
                .or_falsy("enabled", "rabbitmqEnabled", json!(false))
                .or_falsy("events", "rabbitmqEvents", json!([])),
        )
        .group(
            "options_Create_instance.chatwoot.chatwootSettings",
            Placement::Flatten,
            BodyShape::new()
                .or_falsy("chatwootAccountId", "chatwootAccountId", json!(""))
                .or_falsy("chatwootToken", "chatwootToken", json!(""))
                .or_falsy("chatwootUrl", "chatwootUrl", json!(""))
                .or_default("chatwootSignMsg", "chatwootSignMsg", json!(false))
                .or_falsy("chatwootReopenConversation", "chatwootReopenConversation", json!(false))
                .or_falsy("chatwootConversationPending", "chatwootConversationPending", json!(false))
                .or_falsy("chatwootImportContacts", "chatwootImportContacts", json!(false))
                .or_falsy("chatwootNameInbox", "chatwootNameInbox", json!(""))
                .or_falsy("chatwootMergeBrazilContacts", "chatwootMergeBrazilContacts", json!(false))
                .or_falsy("chatwootImportMessages", "chatwootImportMessages", json!(false))
                .or_falsy("chatwootDaysLimitImportMessages", "chatwootDaysLimitImportMessages", json!(0))
                .or_falsy("chatwootOrganization", "chatwootOrganization", json!(""))
                .or_falsy("chatwootLogo", "chatwootLogo", json!("")),
        )
}

/// Recipient field shared by message routes.
fn to_recipient() -> BodyShape {
    BodyShape::new().required("number", "remoteJid")
}

fn delivery_options() -> BodyShape {
    BodyShape::new()
        .or_default("mentionsEveryOne", "mentionsEveryOne", json!(false))
        .or_default("delay", "delay", json!(0))
}

fn media_body(mediatype: &'static str) -> BodyShape {
    to_recipient()
        .literal("mediatype", json!(mediatype))
        .required("media", "media")
        .literal("mimetype", json!(""))
        .or_default("caption", "caption", json!(""))
        .literal("fileName", json!(""))
        .extend(delivery_options())
}

fn message_routes(b: RegistryBuilder) -> RegistryBuilder {
    use Resource::Message;

    b.route(
        Message,
        "sendText",
        RequestSpec::post("/message/sendText/{{instanceName}}").body(
            to_recipient()
                .required("text", "messageText")
                .extend(delivery_options()),
        ),
    )
    .route(
        Message,
        "sendImage",
        RequestSpec::post("/message/sendMedia/{{instanceName}}").body(media_body("image")),
    )
    .route(
        Message,
        "sendSticker",
        RequestSpec::post("/message/sendSticker/{{instanceName}}").body(
            to_recipient()
                .required("sticker", "sticker")
                .extend(delivery_options()),
        ),
    )
    .route(
        Message,
        "sendVideo",
        RequestSpec::post("/message/sendMedia/{{instanceName}}").body(media_body("video")),
    )
    .route(
        Message,
        "sendAudio",
        RequestSpec::post("/message/sendWhatsAppAudio/{{instanceName}}").body(
            to_recipient()
                .required("audio", "media")
                .extend(delivery_options()),
        ),
    )
    .route_with_aliases(
        Message,
        "sendDocument",
        &["sendDocumento"],
        RequestSpec::post("/message/sendMedia/{{instanceName}}").body(
            to_recipient()
                .literal("mediatype", json!("document"))
                .required("media", "media")
                .or_default("caption", "caption", json!(""))
                .literal("fileName", json!(""))
                .extend(delivery_options()),
        ),
    )
    .route(
        Message,
        "sendPoll",
        RequestSpec::post("/message/sendPoll/{{instanceName}}").body(
            to_recipient()
                .required("name", "caption")
                .literal("selectableCount", json!(1))
                .extend(delivery_options())
                .field(
                    "values",
                    Source::Pluck {
                        list: "options_display.metadataValues",
                        field: "optionValue",
                    },
                ),
        ),
    )
    .route(
        Message,
        "sendTemplate",
        RequestSpec::post("/message/sendTemplate/{{instanceName}}").body(
            to_recipient()
                .required("name", "templateName")
                .or_falsy("language", "templateLanguage", json!("pt_BR"))
                .field(
                    "components",
                    Source::Array(vec![Source::Object(
                        BodyShape::new().literal("type", json!("body")).field(
                            "parameters",
                            Source::Records {
                                list: "templateparams_display.metadataValues",
                                fields: vec![("type", "typeValue"), ("text", "textValue")],
                            },
                        ),
                    )]),
                )
                .or_default("mentionsEveryOne", "mentionsEveryOne", json!(false)),
        ),
    )
    .route_with_aliases(
        Message,
        "sendStatus",
        &["sendStories"],
        RequestSpec::post("/message/sendStatus/{{instanceName}}").body(
            BodyShape::new()
                .required("type", "type")
                .required("content", "content")
                .or_default("caption", "caption", json!(""))
                .or_default("backgroundColor", "backgroundColor", json!("#000000"))
                .or_default("font", "font", json!(1))
                .literal("allContacts", json!(true)),
        ),
    )
}

fn event_routes(b: RegistryBuilder) -> RegistryBuilder {
    use Resource::Event;

    b.route(
        Event,
        "webhook",
        Fanout::on("resourceForWebhook")
            .branch(
                "setWebhook",
                RequestSpec::post("/webhook/set/{{instanceName}}").body(BodyShape::new().field(
                    "webhook",
                    Source::Object(
                        BodyShape::new()
                            .or_default("enabled", "enabled", json!(false))
                            .or_falsy("url", "webhookUrl", json!("vazio"))
                            .or_default("webhookByEvents", "webhookByEvents", json!(false))
                            .or_default("webhookBase64", "webhookBase64", json!(false))
                            .or_falsy("events", "webhookEvents", json!([])),
                    ),
                )),
            )
            .branch("findWebhook", RequestSpec::get("/webhook/find/{{instanceName}}")),
    )
    .route(
        Event,
        "rabbitMQ",
        Fanout::on("resourceForRabbitMQ")
            .branch(
                "setRabbitMQ",
                RequestSpec::post("/rabbitmq/set/{{instanceName}}").body(BodyShape::new().field(
                    "rabbitmq",
                    Source::Object(
                        BodyShape::new()
                            .or_default("enabled", "enabled", json!(false))
                            .or_falsy("events", "rabbitMQEvents", json!([])),
                    ),
                )),
            )
            .branch("findRabbitMQ", RequestSpec::get("/rabbitmq/find/{{instanceName}}")),
    )
}

fn integration_routes(b: RegistryBuilder) -> RegistryBuilder {
    let b = b.route(
        Resource::Integration,
        "chatwoot",
        Fanout::on("resourceForChatwoot")
            .branch(
                "setChatwoot",
                RequestSpec::post("/chatwoot/set/{{instanceName}}").body(
                    BodyShape::new()
                        .or_default("enabled", "enabled", json!(false))
                        .required("accountId", "chatwootAccountId")
                        .required("token", "chatwootToken")
                        .required("url", "chatwootUrl")
                        .or_default("signMsg", "chatwootSignMsg", json!(false))
                        .or_default("reopenConversation", "chatwootReopenConversation", json!(false))
                        .or_default("conversationPending", "chatwootConversationPending", json!(false))
                        .or_default("nameInbox", "chatwootNameInbox", json!(""))
                        .or_default("mergeBrazilContacts", "chatwootMergeBrazilContacts", json!(false))
                        .or_default("importContacts", "chatwootImportContacts", json!(false))
                        .or_default("importMessages", "chatwootImportMessages", json!(false))
                        .or_default("daysLimitImportMessages", "chatwootDaysLimitImportMessages", json!(0))
                        .literal("signDelimiter", json!("\n"))
                        .or_default("autoCreate", "chatwootAutoCreate", json!(false))
                        .or_default("organization", "chatwootOrganization", json!(""))
                        .or_default("logo", "chatwootLogo", json!(CHATWOOT_DEFAULT_LOGO)),
                ),
            )
            .branch("findChatwoot", RequestSpec::get("/chatwoot/find/{{instanceName}}")),
    );

    bots::ALL
        .iter()
        .fold(b, |b, flavor| b.route(Resource::Integration, flavor.operation, flavor.route()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_builds() {
        let registry = default_registry().unwrap();
        let ops = registry.operations();
        assert_eq!(ops[&Resource::Instance].len(), 9);
        assert_eq!(ops[&Resource::Message].len(), 9);
        assert_eq!(ops[&Resource::Event].len(), 2);
        assert_eq!(ops[&Resource::Integration].len(), 5);
    }

    #[test]
    fn test_every_resource_has_routes() {
        let registry = default_registry().unwrap();
        for resource in Resource::ALL {
            assert!(registry.operations().contains_key(&resource), "{resource}");
        }
    }

    #[test]
    fn test_create_instance_minimal_body() {
        let bag = crate::params::ParameterBag::new().with("instanceName", "x").with("token", "");
        assert_eq!(
            create_instance_body().build(&bag).unwrap(),
            json!({"instanceName": "x", "integration": "WHATSAPP-BAILEYS"})
        );
    }
}
