use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// Claims we care about from an OpenAI-issued JWT. Decoded without
/// verification; the token arrives directly from the issuer over TLS.
#[derive(Debug, Default, Deserialize)]
struct JwtClaims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default, rename = "https://api.openai.com/auth")]
    auth: AuthClaim,
}

#[derive(Debug, Default, Deserialize)]
struct AuthClaim {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    chatgpt_account_id: String,
}

fn decode_claims(token: &str) -> Option<JwtClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let raw = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// ChatGPT account id: auth claim first, then `user_id`, then `sub`.
pub fn extract_account_id(token: &str) -> Option<String> {
    let claims = decode_claims(token)?;
    if !claims.auth.chatgpt_account_id.is_empty() {
        return Some(claims.auth.chatgpt_account_id);
    }
    if !claims.auth.user_id.is_empty() {
        return Some(claims.auth.user_id);
    }
    if !claims.sub.is_empty() {
        return Some(claims.sub);
    }
    None
}

pub fn extract_email(token: &str) -> Option<String> {
    let claims = decode_claims(token)?;
    if claims.email.is_empty() {
        None
    } else {
        Some(claims.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn account_id_prefers_auth_claim() {
        let token = make_token(serde_json::json!({
            "sub": "user-sub",
            "https://api.openai.com/auth": {
                "chatgpt_account_id": "acct-1",
                "user_id": "user-1",
            },
        }));
        assert_eq!(extract_account_id(&token).as_deref(), Some("acct-1"));
    }

    #[test]
    fn account_id_falls_back_to_user_id_then_sub() {
        let token = make_token(serde_json::json!({
            "sub": "user-sub",
            "https://api.openai.com/auth": { "user_id": "user-1" },
        }));
        assert_eq!(extract_account_id(&token).as_deref(), Some("user-1"));

        let token = make_token(serde_json::json!({ "sub": "user-sub" }));
        assert_eq!(extract_account_id(&token).as_deref(), Some("user-sub"));
    }

    #[test]
    fn malformed_tokens_yield_none() {
        assert!(extract_account_id("not-a-jwt").is_none());
        assert!(extract_email("a.b").is_none());
        assert!(extract_email(&make_token(serde_json::json!({}))).is_none());
    }
}
