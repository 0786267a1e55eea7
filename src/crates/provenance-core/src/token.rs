//! Token identity and lineage
//!
//! A token is one in-flight instance of a source row on a specific path
//! through the DAG. Tokens are immutable values: executors produce updated
//! payloads through [`Token::with_updated_data`], which preserves every
//! identity and lineage field by construction. Nothing is ever mutated in
//! place, so sibling branches of a fork can never alias each other's state.
//!
//! [`TokenManager`] mints identities and enforces the fork/join contract:
//! fork time records how many children were promised; join time must see
//! exactly those children. "Promised N, only M arrived" is an integrity
//! violation that aborts the run, because a partial join would leave the
//! audit trail claiming a merge that never fully happened.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable identity of a source row across all tokens derived from it
pub type RowId = String;

/// Unique identity of one token (one DAG path instance)
pub type TokenId = String;

/// One in-flight instance of a source row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// Row identity, shared by every token derived from one source row
    pub row_id: RowId,

    /// Token identity, unique per path instance
    pub token_id: TokenId,

    /// Current row payload
    pub data: serde_json::Value,

    /// Branch name assigned at fork, if this token is a fork child
    pub branch: Option<String>,

    /// Group shared by all children of one fork
    pub fork_group: Option<String>,

    /// Group shared by all children of one expand
    pub expand_group: Option<String>,

    /// Group linking a merged token back to its join inputs
    pub join_group: Option<String>,
}

impl Token {
    /// Copy-on-write payload update; identity and lineage preserved
    pub fn with_updated_data(&self, data: serde_json::Value) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// The lineage group this token belongs to, if any
    pub fn group(&self) -> Option<&str> {
        self.fork_group
            .as_deref()
            .or(self.expand_group.as_deref())
    }
}

/// What was promised when a group was created
#[derive(Debug, Clone)]
struct GroupContract {
    /// Number of children minted
    expected: usize,

    /// Branch names, present for forks, absent for expands
    branches: Option<Vec<String>>,
}

/// Mints token identities and tracks fork/expand contracts until joined
#[derive(Debug, Default)]
pub struct TokenManager {
    contracts: HashMap<String, GroupContract>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token for an ingested source row
    pub fn mint(&mut self, row_id: impl Into<RowId>, data: serde_json::Value) -> Token {
        Token {
            row_id: row_id.into(),
            token_id: Uuid::new_v4().to_string(),
            data,
            branch: None,
            fork_group: None,
            expand_group: None,
            join_group: None,
        }
    }

    /// Fork a token into named branches with COPY semantics.
    ///
    /// Every child shares the parent's `row_id` and a new `fork_group`; each
    /// gets a unique `token_id` and its own branch name.
    pub fn fork(&mut self, token: &Token, branch_names: &[String]) -> Result<Vec<Token>> {
        if branch_names.is_empty() {
            return Err(PipelineError::integrity(format!(
                "fork of token '{}' declared zero branches",
                token.token_id
            )));
        }
        let mut unique = branch_names.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != branch_names.len() {
            return Err(PipelineError::integrity(format!(
                "fork of token '{}' declared duplicate branch names",
                token.token_id
            )));
        }

        let group = Uuid::new_v4().to_string();
        self.contracts.insert(
            group.clone(),
            GroupContract {
                expected: branch_names.len(),
                branches: Some(branch_names.to_vec()),
            },
        );

        Ok(branch_names
            .iter()
            .map(|branch| Token {
                row_id: token.row_id.clone(),
                token_id: Uuid::new_v4().to_string(),
                data: token.data.clone(),
                branch: Some(branch.clone()),
                fork_group: Some(group.clone()),
                expand_group: None,
                join_group: None,
            })
            .collect())
    }

    /// Expand a token into `count` anonymous children, one per payload.
    ///
    /// Children share an `expand_group`; unlike fork there are no branch
    /// names, the children are independent downstream rows.
    pub fn expand(&mut self, token: &Token, payloads: Vec<serde_json::Value>) -> Result<Vec<Token>> {
        if payloads.is_empty() {
            return Err(PipelineError::integrity(format!(
                "expand of token '{}' produced zero children",
                token.token_id
            )));
        }

        let group = Uuid::new_v4().to_string();
        self.contracts.insert(
            group.clone(),
            GroupContract {
                expected: payloads.len(),
                branches: None,
            },
        );

        Ok(payloads
            .into_iter()
            .map(|data| Token {
                row_id: token.row_id.clone(),
                token_id: Uuid::new_v4().to_string(),
                data,
                branch: None,
                fork_group: None,
                expand_group: Some(group.clone()),
                join_group: None,
            })
            .collect())
    }

    /// How many siblings a group promised, if the contract is still open
    pub fn expected_members(&self, group: &str) -> Option<usize> {
        self.contracts.get(group).map(|c| c.expected)
    }

    /// Join sibling tokens back into one merged token.
    ///
    /// Validates the tokens against the contract recorded at fork/expand
    /// time; any cardinality or branch-name mismatch is an integrity error.
    /// The merged token carries a fresh `join_group` for audit linkage and a
    /// payload keyed by branch name (fork) or indexed array (expand).
    pub fn join(&mut self, tokens: &[Token], coalesce_name: &str) -> Result<Token> {
        let first = tokens.first().ok_or_else(|| {
            PipelineError::integrity(format!("join at '{coalesce_name}' received no tokens"))
        })?;
        let group = first.group().ok_or_else(|| {
            PipelineError::integrity(format!(
                "token '{}' arrived at coalesce '{coalesce_name}' without a fork or expand group",
                first.token_id
            ))
        })?;

        if tokens.iter().any(|t| t.group() != Some(group)) {
            return Err(PipelineError::integrity(format!(
                "join at '{coalesce_name}' mixed tokens from different groups"
            )));
        }
        if tokens.iter().any(|t| t.row_id != first.row_id) {
            return Err(PipelineError::integrity(format!(
                "join at '{coalesce_name}' mixed tokens from different rows"
            )));
        }

        let contract = self.contracts.get(group).ok_or_else(|| {
            PipelineError::integrity(format!(
                "join at '{coalesce_name}' references unknown group '{group}'"
            ))
        })?;

        if tokens.len() != contract.expected {
            return Err(PipelineError::integrity(format!(
                "join at '{coalesce_name}' promised {} children, saw {}",
                contract.expected,
                tokens.len()
            )));
        }

        let data = match &contract.branches {
            Some(branches) => {
                let mut observed: Vec<&str> =
                    tokens.iter().filter_map(|t| t.branch.as_deref()).collect();
                observed.sort_unstable();
                let mut promised: Vec<&str> = branches.iter().map(String::as_str).collect();
                promised.sort_unstable();
                if observed != promised {
                    return Err(PipelineError::integrity(format!(
                        "join at '{coalesce_name}' branch set {observed:?} does not match promised {promised:?}"
                    )));
                }
                let mut map = serde_json::Map::new();
                for t in tokens {
                    // branch presence checked above
                    if let Some(branch) = &t.branch {
                        map.insert(branch.clone(), t.data.clone());
                    }
                }
                serde_json::Value::Object(map)
            }
            None => serde_json::Value::Array(tokens.iter().map(|t| t.data.clone()).collect()),
        };

        // Contract consumed: a second join against this group is itself a fault
        let group = group.to_string();
        self.contracts.remove(&group);

        Ok(Token {
            row_id: first.row_id.clone(),
            token_id: Uuid::new_v4().to_string(),
            data,
            branch: None,
            fork_group: first.fork_group.clone(),
            expand_group: first.expand_group.clone(),
            join_group: Some(Uuid::new_v4().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn branches(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mint_assigns_identity() {
        let mut mgr = TokenManager::new();
        let a = mgr.mint("row-1", json!({"n": 1}));
        let b = mgr.mint("row-1", json!({"n": 1}));
        assert_eq!(a.row_id, b.row_id);
        assert_ne!(a.token_id, b.token_id);
        assert!(a.group().is_none());
    }

    #[test]
    fn test_with_updated_data_preserves_lineage() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({"n": 1}));
        let children = mgr.fork(&token, &branches(&["left", "right"])).unwrap();

        let updated = children[0].with_updated_data(json!({"n": 2}));
        assert_eq!(updated.token_id, children[0].token_id);
        assert_eq!(updated.row_id, children[0].row_id);
        assert_eq!(updated.branch, children[0].branch);
        assert_eq!(updated.fork_group, children[0].fork_group);
        assert_eq!(updated.data, json!({"n": 2}));
    }

    #[test]
    fn test_fork_shares_group_and_row() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({"n": 1}));
        let children = mgr.fork(&token, &branches(&["left", "right"])).unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].fork_group, children[1].fork_group);
        assert_eq!(children[0].row_id, "row-1");
        assert_ne!(children[0].token_id, children[1].token_id);
        assert_eq!(children[0].branch.as_deref(), Some("left"));
        assert_eq!(children[1].branch.as_deref(), Some("right"));
    }

    #[test]
    fn test_join_merges_full_fork() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({"n": 1}));
        let children = mgr.fork(&token, &branches(&["left", "right"])).unwrap();

        let merged = mgr.join(&children, "merge").unwrap();
        assert_eq!(merged.row_id, "row-1");
        assert!(merged.join_group.is_some());
        assert_eq!(merged.data["left"], json!({"n": 1}));
        assert_eq!(merged.data["right"], json!({"n": 1}));
    }

    #[test]
    fn test_partial_join_is_integrity_error() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({"n": 1}));
        let children = mgr.fork(&token, &branches(&["a", "b", "c"])).unwrap();

        let err = mgr.join(&children[..2], "merge").unwrap_err();
        assert!(matches!(err, PipelineError::Integrity(_)));
        assert!(err.to_string().contains("promised 3"));
    }

    #[test]
    fn test_join_wrong_branch_set_rejected() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({}));
        let mut children = mgr.fork(&token, &branches(&["a", "b"])).unwrap();
        children[1].branch = Some("z".to_string());

        let err = mgr.join(&children, "merge").unwrap_err();
        assert!(err.to_string().contains("branch set"));
    }

    #[test]
    fn test_double_join_rejected() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({}));
        let children = mgr.fork(&token, &branches(&["a"])).unwrap();

        mgr.join(&children, "merge").unwrap();
        let err = mgr.join(&children, "merge").unwrap_err();
        assert!(err.to_string().contains("unknown group"));
    }

    #[test]
    fn test_expand_children_share_group() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({"items": [1, 2, 3]}));
        let children = mgr
            .expand(&token, vec![json!(1), json!(2), json!(3)])
            .unwrap();

        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| c.expand_group == children[0].expand_group));
        assert!(children.iter().all(|c| c.branch.is_none()));
        assert_eq!(mgr.expected_members(children[0].group().unwrap()), Some(3));
    }

    #[test]
    fn test_expand_then_join_produces_array() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({}));
        let children = mgr.expand(&token, vec![json!("a"), json!("b")]).unwrap();

        let merged = mgr.join(&children, "gather").unwrap();
        assert_eq!(merged.data, json!(["a", "b"]));
    }

    #[test]
    fn test_fork_zero_branches_rejected() {
        let mut mgr = TokenManager::new();
        let token = mgr.mint("row-1", json!({}));
        assert!(mgr.fork(&token, &[]).is_err());
    }
}
