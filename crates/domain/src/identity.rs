use serde::{Deserialize, Serialize};

/// Identity of the actor performing an operation, as resolved by the
/// authentication layer. For creators `user_id` is the messaging-platform id;
/// for moderators it is the admin account id recorded in review metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
    pub username: String,
}

impl ActorIdentity {
    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            user_id: user_id.clone(),
            username: user_id,
        }
    }
}
