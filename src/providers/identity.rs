use crate::types::{AccountIdentity, Provider};
use base64::Engine;
use serde_json::{Value, json};

fn normalize_email(raw: Option<&str>) -> Option<String> {
    raw.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty())
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read the account email and the provider's tenancy handle out of an
/// identity endpoint payload.
pub fn parse_identity(provider: Provider, body: &Value) -> AccountIdentity {
    match provider {
        Provider::Google => AccountIdentity {
            email: normalize_email(body.get("email").and_then(Value::as_str)),
            metadata: None,
        },
        Provider::MicrosoftTeams => AccountIdentity {
            email: normalize_email(
                body.get("mail")
                    .and_then(Value::as_str)
                    .or_else(|| body.get("userPrincipalName").and_then(Value::as_str)),
            ),
            metadata: None,
        },
        Provider::Zoom => AccountIdentity {
            email: normalize_email(body.get("email").and_then(Value::as_str)),
            metadata: body
                .get("account_id")
                .and_then(id_string)
                .map(|id| json!({ "account_id": id })),
        },
        Provider::Clickup => {
            let user = body.get("user").unwrap_or(body);
            let team = user
                .get("teams")
                .or_else(|| body.get("teams"))
                .and_then(|t| t.get(0))
                .and_then(|t| t.get("id"))
                .and_then(id_string);
            AccountIdentity {
                email: normalize_email(user.get("email").and_then(Value::as_str)),
                metadata: team.map(|id| json!({ "team_id": id })),
            }
        }
        Provider::Asana => {
            let data = body.get("data").unwrap_or(body);
            let workspace = data
                .get("workspaces")
                .and_then(|w| w.get(0))
                .and_then(|w| w.get("gid"))
                .and_then(id_string);
            AccountIdentity {
                email: normalize_email(data.get("email").and_then(Value::as_str)),
                metadata: workspace.map(|id| json!({ "workspace_id": id })),
            }
        }
        Provider::Monday => {
            let me = body.pointer("/data/me").unwrap_or(&Value::Null);
            let account = me.pointer("/account/id").and_then(id_string);
            AccountIdentity {
                email: normalize_email(me.get("email").and_then(Value::as_str)),
                metadata: account.map(|id| json!({ "account_id": id })),
            }
        }
    }
}

/// Email claim of an unverified OpenID id_token.
pub fn email_from_id_token(id_token: &str) -> Option<String> {
    let payload_b64 = id_token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64.trim_end_matches('='))
        .ok()?;
    let payload: Value = serde_json::from_slice(&decoded).ok()?;
    normalize_email(payload.get("email").and_then(Value::as_str))
}
