//! Project configuration blob model.
//!
//! # Purpose
//! Serde form of the configuration JSON stored on the project record. Field
//! names follow the wire blob (camelCase). The business semantics — voting,
//! expressing, funding, tagging rules — are interpreted read-only by the
//! [`Project`](super::Project) view; nothing here is mutated in place.
use serde::{Deserialize, Serialize};

/// A configuration together with the opaque concurrency token that names
/// this revision of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedConfig {
    pub version: String,
    pub config: ProjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Subdomain slug; every project has exactly one.
    pub slug: String,
    /// Optional custom domain; empty string is treated as unset.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

fn default_schema_version() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: String,
    pub name: String,
    #[serde(default)]
    pub support: Support,
    #[serde(default)]
    pub workflow: Workflow,
    #[serde(default)]
    pub tagging: Tagging,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Support {
    #[serde(default)]
    pub vote: Option<Voting>,
    #[serde(default)]
    pub express: Option<Expressing>,
    #[serde(default)]
    pub fund: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voting {
    #[serde(default)]
    pub enable_downvotes: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expressing {
    /// When present, the only expressions users may leave, with weights.
    #[serde(default)]
    pub limit_emoji_set: Option<Vec<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    pub display: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub statuses: Vec<IdeaStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaStatus {
    pub status_id: String,
    pub name: String,
    #[serde(default)]
    pub disable_voting: bool,
    #[serde(default)]
    pub disable_expressions: bool,
    #[serde(default)]
    pub disable_funding: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tagging {
    #[serde(default)]
    pub tag_groups: Vec<TagGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagGroup {
    pub name: String,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub user_settable: bool,
    #[serde(default)]
    pub min_required: Option<usize>,
    #[serde(default)]
    pub max_required: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_decodes_from_camel_case_blob() {
        let json = r#"{
            "schemaVersion": 2,
            "slug": "acme",
            "domain": "feedback.acme.com",
            "categories": [{
                "categoryId": "c1",
                "name": "Ideas",
                "support": {"vote": {"enableDownvotes": true}, "fund": true},
                "workflow": {"statuses": [{"statusId": "s1", "name": "Open"}]}
            }]
        }"#;
        let config: ProjectConfig = serde_json::from_str(json).expect("decode");
        assert_eq!(config.schema_version, 2);
        assert_eq!(config.slug, "acme");
        assert_eq!(config.domain.as_deref(), Some("feedback.acme.com"));
        let category = &config.categories[0];
        assert!(category.support.vote.as_ref().expect("vote").enable_downvotes);
        assert!(category.support.fund);
        assert_eq!(category.workflow.statuses[0].status_id, "s1");
    }

    #[test]
    fn schema_version_defaults_to_one() {
        let config: ProjectConfig = serde_json::from_str(r#"{"slug":"acme"}"#).expect("decode");
        assert_eq!(config.schema_version, 1);
        assert!(config.categories.is_empty());
    }
}
