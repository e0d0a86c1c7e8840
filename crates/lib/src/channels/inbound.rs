//! Inbound message from the provider webhook, extracted from its form payload.

/// Transport-scheme prefix the provider puts on WhatsApp addresses.
pub const WHATSAPP_SCHEME: &str = "whatsapp:";

/// A customer message as delivered by the provider. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender phone number with the `whatsapp:` prefix removed.
    pub from: String,
    pub body: String,
    /// Provider message id (`MessageSid`).
    pub message_sid: String,
}

impl InboundMessage {
    /// Pull `From`, `Body` and `MessageSid` out of decoded form params. First occurrence wins.
    pub fn from_params(params: &[(String, String)]) -> Self {
        let field = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        Self {
            from: strip_scheme(&field("From")).to_string(),
            body: field("Body"),
            message_sid: field("MessageSid"),
        }
    }
}

/// `whatsapp:+1555...` -> `+1555...`; other addresses are returned unchanged.
pub fn strip_scheme(address: &str) -> &str {
    let a = address.trim();
    a.strip_prefix(WHATSAPP_SCHEME).unwrap_or(a)
}

/// Decode an `application/x-www-form-urlencoded` body into ordered key/value pairs.
pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}
