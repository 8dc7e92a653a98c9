//! Conflict sets and per-conflict resolution decisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a single conflict should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    /// Keep the uploaded (client) version.
    TakeMine,
    /// Keep the current server version.
    TakeTheirs,
    /// Apply a merged payload supplied with the decision.
    Merge,
}

/// One conflicting feature as reported by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictItem {
    /// Stable identity of the conflict within the batch.
    pub feature_hash: String,
    /// Server-side feature id, when the conflict concerns an existing row.
    #[serde(default)]
    pub original_id: Option<i64>,
    /// Server-assigned classification, e.g. `ATTRIBUTE` or `GEOMETRY`.
    pub conflict_type: String,
    /// The uploaded version of the feature.
    #[serde(default)]
    pub mine: Option<Value>,
    /// The current server version of the feature.
    #[serde(default)]
    pub theirs: Option<Value>,
    /// Server suggestion, advisory only.
    #[serde(default)]
    pub suggested: Option<ConflictResolution>,
}

/// All conflicts blocking a batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSet {
    pub batch_uuid: String,
    #[serde(default)]
    pub conflicts: Vec<ConflictItem>,
}

impl ConflictSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Uniform decision for every conflict in the set.
    ///
    /// `Merge` needs a per-conflict payload and cannot be applied in bulk.
    #[must_use]
    pub fn decide_all(&self, resolution: ConflictResolution) -> Vec<ConflictDecision> {
        self.conflicts
            .iter()
            .map(|item| ConflictDecision {
                feature_hash: item.feature_hash.clone(),
                resolution,
                merged: None,
            })
            .collect()
    }
}

/// One resolution decision submitted back to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDecision {
    pub feature_hash: String,
    pub resolution: ConflictResolution,
    /// Merged feature payload, required when `resolution` is `Merge`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> ConflictSet {
        serde_json::from_str(
            r#"{
                "batchUuid": "b-9",
                "conflicts": [
                    {"featureHash": "h1", "originalId": 7, "conflictType": "ATTRIBUTE",
                     "mine": {"crop": "maize"}, "theirs": {"crop": "wheat"},
                     "suggested": "TAKE_THEIRS"},
                    {"featureHash": "h2", "conflictType": "GEOMETRY"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn deserializes_conflict_set() {
        let set = sample_set();
        assert_eq!(set.batch_uuid, "b-9");
        assert_eq!(set.conflicts.len(), 2);
        assert_eq!(set.conflicts[0].suggested, Some(ConflictResolution::TakeTheirs));
        assert_eq!(set.conflicts[1].original_id, None);
    }

    #[test]
    fn decide_all_covers_every_conflict() {
        let decisions = sample_set().decide_all(ConflictResolution::TakeMine);
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.resolution == ConflictResolution::TakeMine));
        assert!(decisions.iter().all(|d| d.merged.is_none()));
    }

    #[test]
    fn decision_serializes_screaming_snake() {
        let decision = ConflictDecision {
            feature_hash: "h1".to_string(),
            resolution: ConflictResolution::TakeTheirs,
            merged: None,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["featureHash"], "h1");
        assert_eq!(json["resolution"], "TAKE_THEIRS");
        assert!(json.get("merged").is_none());
    }
}
