use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// WhatsApp account information available after successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeInfo {
    /// Full JID for the connected account.
    pub jid: String,
    /// Optional profile display name.
    pub push_name: Option<String>,
}

/// Identity reported to callers while a session is connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub display_name: String,
    /// Phone-number part of the account JID.
    pub external_address: String,
}

impl SessionIdentity {
    const DEFAULT_DISPLAY_NAME: &'static str = "WhatsApp User";

    /// Derives the identity from a JID such as `628123:4@s.whatsapp.net`.
    pub fn from_jid(jid: &str, push_name: Option<&str>) -> Self {
        let user_part = jid.split('@').next().unwrap_or(jid);
        let external_address = user_part.split(':').next().unwrap_or(user_part).to_owned();
        let display_name = push_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(Self::DEFAULT_DISPLAY_NAME)
            .to_owned();

        Self {
            display_name,
            external_address,
        }
    }
}

impl From<&MeInfo> for SessionIdentity {
    fn from(me: &MeInfo) -> Self {
        Self::from_jid(&me.jid, me.push_name.as_deref())
    }
}

/// Protocol credentials persisted per user.
///
/// `keys` is owned by the protocol client and treated as opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Credentials {
    /// Account bound to these credentials once pairing succeeded.
    #[serde(default)]
    pub me: Option<MeInfo>,
    #[serde(default)]
    pub keys: Value,
}

impl Credentials {
    /// Generates fresh, unpaired key material.
    pub fn generate() -> Self {
        let noise_key: [u8; 32] = rand::random();
        let identity_key: [u8; 32] = rand::random();
        let adv_secret: [u8; 32] = rand::random();

        Self {
            me: None,
            keys: json!({
                "noiseKey": STANDARD.encode(noise_key),
                "identityKey": STANDARD.encode(identity_key),
                "advSecretKey": STANDARD.encode(adv_secret),
            }),
        }
    }

    /// Returns true once pairing completed and an account is bound.
    pub fn is_paired(&self) -> bool {
        self.me.is_some()
    }

    /// Reads a base64 key from the opaque key bag.
    pub fn key_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.keys
            .get(name)
            .and_then(Value::as_str)
            .and_then(|encoded| STANDARD.decode(encoded).ok())
    }
}
