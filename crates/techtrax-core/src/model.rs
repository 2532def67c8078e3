// Domain types shared by the channel and its consumers.

use serde::Serialize;
use techtrax_api::AccessClaims;
use techtrax_api::models::ChannelUser;

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Who the open channel is authenticated as.
///
/// Built from the `connected` event's `user`, with gaps filled from the
/// access token claims. Replaced wholesale on every reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub role: String,
    pub tenant_id: Option<String>,
    pub display_name: String,
    pub email: Option<String>,
}

impl Session {
    pub fn from_parts(user: Option<&ChannelUser>, claims: Option<&AccessClaims>) -> Self {
        let user_id = user
            .and_then(|u| u.id.clone())
            .or_else(|| claims.and_then(AccessClaims::subject).map(String::from))
            .unwrap_or_default();
        let role = user
            .and_then(|u| u.role.clone())
            .or_else(|| claims.and_then(|c| c.role.clone()))
            .unwrap_or_default();
        let tenant_id = user
            .and_then(|u| u.tenant_id.clone())
            .or_else(|| claims.and_then(|c| c.tenant_id.clone()));
        let email = user
            .and_then(|u| u.email.clone())
            .or_else(|| claims.and_then(|c| c.email.clone()));

        let display_name = user
            .and_then(user_display_name)
            .or_else(|| claims.and_then(AccessClaims::display_name))
            .or_else(|| email.clone())
            .unwrap_or_else(|| user_id.clone());

        Self {
            user_id,
            role,
            tenant_id,
            display_name,
            email,
        }
    }

    pub fn is_doctor(&self) -> bool {
        self.role == "doctor"
    }
}

fn user_display_name(user: &ChannelUser) -> Option<String> {
    if let Some(ref name) = user.name {
        return Some(name.clone());
    }
    match (&user.first_name, &user.last_name) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(first), None) => Some(first.clone()),
        _ => None,
    }
}
