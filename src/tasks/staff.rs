//! Staff directory seam. Availability is owned by an external collaborator;
//! the lifecycle manager only asks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: String,
    pub name: String,
    /// MSISDN for the SMS channel.
    #[serde(default)]
    pub phone: Option<String>,
    /// Device token for the push channel.
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

#[async_trait]
pub trait StaffDirectory: Send + Sync {
    async fn find(&self, staff_id: &str) -> Option<StaffMember>;

    /// Staff members currently able to take work, ordered by id.
    async fn available(&self) -> Vec<StaffMember>;
}

/// Staff directory backed by a map, seeded from configuration.
#[derive(Default)]
pub struct InMemoryStaffDirectory {
    members: RwLock<BTreeMap<String, StaffMember>>,
}

impl InMemoryStaffDirectory {
    pub fn new(members: impl IntoIterator<Item = StaffMember>) -> Self {
        Self {
            members: RwLock::new(members.into_iter().map(|m| (m.id.clone(), m)).collect()),
        }
    }

    pub async fn upsert(&self, member: StaffMember) {
        self.members.write().await.insert(member.id.clone(), member);
    }

    pub async fn set_available(&self, staff_id: &str, available: bool) -> bool {
        match self.members.write().await.get_mut(staff_id) {
            Some(member) => {
                member.available = available;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StaffDirectory for InMemoryStaffDirectory {
    async fn find(&self, staff_id: &str) -> Option<StaffMember> {
        self.members.read().await.get(staff_id).cloned()
    }

    async fn available(&self) -> Vec<StaffMember> {
        self.members
            .read()
            .await
            .values()
            .filter(|m| m.available)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, available: bool) -> StaffMember {
        StaffMember {
            id: id.into(),
            name: format!("Staff {id}"),
            phone: None,
            push_token: None,
            available,
        }
    }

    #[tokio::test]
    async fn available_skips_unavailable_members() {
        let dir = InMemoryStaffDirectory::new([member("b", true), member("a", true), member("c", false)]);
        let ids: Vec<_> = dir.available().await.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn set_available_toggles_member() {
        let dir = InMemoryStaffDirectory::new([member("a", true)]);
        assert!(dir.set_available("a", false).await);
        assert!(!dir.find("a").await.unwrap().available);
        assert!(!dir.set_available("missing", true).await);
    }

    #[test]
    fn staff_toml_defaults_to_available() {
        let m: StaffMember = toml::from_str(
            r#"
            id = "s-1"
            name = "Josh Canillas"
            phone = "+639171234567"
        "#,
        )
        .unwrap();
        assert!(m.available);
        assert!(m.push_token.is_none());
    }
}
