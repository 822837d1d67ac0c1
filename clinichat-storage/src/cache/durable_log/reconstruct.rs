//! Rebuild question/answer turns from raw message-log rows.
//!
//! Rows are walked once in id order. Assistant rows that carry both the
//! question and the answer stand on their own. Assistant rows that carry only
//! the answer are paired with, in order of preference: the unmatched user row
//! just before them, the user row named by `parent_id`, then the nearest
//! earlier user row. Anything left unpaired is dropped with a warning.
//!
//! Summary-tagged rows never become regular turns. The newest one is returned
//! separately, and turns it already covers are left out.

use std::collections::HashMap;

use clinichat_core::{ConversationTurn, ReconstructionStrategy, Timestamp};

use super::log::{MessageRole, MessageRow, SummaryMeta};

/// A reconstructed turn and the log row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedTurn {
    pub row_id: i64,
    pub turn: ConversationTurn,
}

/// A summary previously written to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSummary {
    pub row_id: i64,
    pub text: String,
    pub summarized_turn_count: u32,
    /// Turns from rows at or below this id are folded into the summary
    pub covers_through_id: i64,
    pub created_at: Timestamp,
}

impl StoredSummary {
    pub fn to_turn(&self, conversation_id: &str) -> ConversationTurn {
        ConversationTurn::summary(conversation_id, self.text.clone(), self.summarized_turn_count)
            .with_timestamp(self.created_at)
    }
}

/// Result of reconstructing one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    pub summary: Option<StoredSummary>,
    /// Turns newer than the summary, in log order
    pub turns: Vec<LoggedTurn>,
    /// Assistant rows that could not be paired
    pub dropped: usize,
}

impl Reconstruction {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.turns.is_empty()
    }
}

fn text(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn latest_summary(rows: &[&MessageRow]) -> Option<StoredSummary> {
    rows.iter().rev().find_map(|row| {
        let meta = SummaryMeta::from_row(row)?;
        let text = text(&row.response)?;
        Some(StoredSummary {
            row_id: row.id,
            text: text.to_string(),
            summarized_turn_count: meta.summarized_turn_count.unwrap_or(0),
            covers_through_id: meta.covers_through_id.unwrap_or(row.id),
            created_at: row.created_at,
        })
    })
}

/// Rebuild the turns of `conversation_id` from its rows.
pub fn reconstruct(
    conversation_id: &str,
    rows: &[MessageRow],
    strategy: ReconstructionStrategy,
) -> Reconstruction {
    let mut ordered: Vec<&MessageRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.id);

    let summary = latest_summary(&ordered);
    let covered = summary.as_ref().map_or(i64::MIN, |s| s.covers_through_id);

    let mut users: HashMap<i64, &MessageRow> = HashMap::new();
    let mut pending_user: Option<&MessageRow> = None;
    let mut last_user: Option<&MessageRow> = None;
    let mut turns = Vec::new();
    let mut dropped = 0;

    for row in ordered {
        if SummaryMeta::from_row(row).is_some() {
            continue;
        }

        match row.role {
            MessageRole::User => {
                if text(&row.query).is_some() {
                    users.insert(row.id, row);
                    pending_user = Some(row);
                    last_user = Some(row);
                }
            }
            MessageRole::Assistant => {
                let Some(answer) = text(&row.response) else {
                    continue;
                };
                let own_query = text(&row.query);

                let question = match (strategy, own_query) {
                    (ReconstructionStrategy::AssistantRows, Some(q)) => Some(q),
                    (ReconstructionStrategy::AssistantRows, None) => continue,
                    (ReconstructionStrategy::Auto, Some(q)) => {
                        pending_user = None;
                        Some(q)
                    }
                    (ReconstructionStrategy::Auto, None) | (ReconstructionStrategy::Paired, _) => {
                        pending_user
                            .take()
                            .or_else(|| row.parent_id.and_then(|p| users.get(&p).copied()))
                            .or(last_user)
                            .and_then(|u| text(&u.query))
                            .or(own_query)
                    }
                };

                let Some(question) = question else {
                    dropped += 1;
                    tracing::warn!(
                        conversation_id,
                        tier = "durable_log",
                        operation = "reconstruct",
                        row_id = row.id,
                        "dropping assistant row with no matching question"
                    );
                    continue;
                };

                if row.id <= covered {
                    continue;
                }
                turns.push(LoggedTurn {
                    row_id: row.id,
                    turn: ConversationTurn::new(conversation_id, question, answer)
                        .with_timestamp(row.created_at),
                });
            }
            MessageRole::Other(_) => {}
        }
    }

    Reconstruction {
        summary,
        turns,
        dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(id: i64, role: MessageRole, query: Option<&str>, response: Option<&str>) -> MessageRow {
        MessageRow {
            id,
            conversation_id: 42,
            role,
            query: query.map(str::to_string),
            response: response.map(str::to_string),
            parent_id: None,
            meta: None,
            created_at: Utc::now(),
        }
    }

    fn pairs(rec: &Reconstruction) -> Vec<(String, String)> {
        rec.turns
            .iter()
            .map(|t| (t.turn.query.clone(), t.turn.response.clone()))
            .collect()
    }

    fn p(q: &str, a: &str) -> (String, String) {
        (q.to_string(), a.to_string())
    }

    #[test]
    fn test_self_contained_assistant_rows() {
        let rows = vec![
            row(1, MessageRole::User, Some("Q1"), None),
            row(2, MessageRole::Assistant, Some("Q1"), Some("A1")),
            row(3, MessageRole::User, Some("Q2"), None),
            row(4, MessageRole::Assistant, Some("Q2"), Some("A2")),
            // orphaned user row without an answer
            row(5, MessageRole::User, Some("Q3"), None),
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::AssistantRows);
        assert_eq!(pairs(&rec), vec![p("Q1", "A1"), p("Q2", "A2")]);
        assert_eq!(rec.turns[1].row_id, 4);
    }

    #[test]
    fn test_assistant_rows_ignores_answer_only_rows() {
        let rows = vec![
            row(1, MessageRole::User, Some("Q1"), None),
            row(2, MessageRole::Assistant, None, Some("A1")),
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::AssistantRows);
        assert!(rec.is_empty());
        assert_eq!(rec.dropped, 0);
    }

    #[test]
    fn test_paired_user_then_assistant() {
        let rows = vec![
            row(1, MessageRole::User, Some("Q1"), None),
            row(2, MessageRole::Assistant, None, Some("A1")),
            row(3, MessageRole::User, Some("Q2"), None),
            row(4, MessageRole::Assistant, None, Some("A2")),
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::Paired);
        assert_eq!(pairs(&rec), vec![p("Q1", "A1"), p("Q2", "A2")]);
    }

    #[test]
    fn test_parent_reference_used_when_no_pending_user() {
        let mut answer = row(5, MessageRole::Assistant, None, Some("A1-again"));
        answer.parent_id = Some(1);
        let rows = vec![
            row(1, MessageRole::User, Some("Q1"), None),
            row(2, MessageRole::Assistant, None, Some("A1")),
            row(3, MessageRole::User, Some("Q2"), None),
            row(4, MessageRole::Assistant, None, Some("A2")),
            answer,
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::Auto);
        assert_eq!(
            pairs(&rec),
            vec![p("Q1", "A1"), p("Q2", "A2"), p("Q1", "A1-again")]
        );
    }

    #[test]
    fn test_nearest_preceding_user_fallback() {
        let rows = vec![
            row(1, MessageRole::User, Some("Q1"), None),
            row(2, MessageRole::Assistant, None, Some("A1")),
            row(3, MessageRole::Assistant, None, Some("A1b")),
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::Auto);
        assert_eq!(pairs(&rec), vec![p("Q1", "A1"), p("Q1", "A1b")]);
    }

    #[test]
    fn test_unpairable_assistant_dropped() {
        let rows = vec![row(1, MessageRole::Assistant, None, Some("A0"))];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::Auto);
        assert!(rec.turns.is_empty());
        assert_eq!(rec.dropped, 1);
    }

    #[test]
    fn test_auto_mixes_both_shapes() {
        let rows = vec![
            row(1, MessageRole::User, Some("Q1"), None),
            row(2, MessageRole::Assistant, Some("Q1"), Some("A1")),
            row(3, MessageRole::User, Some("Q2"), None),
            row(4, MessageRole::Assistant, None, Some("A2")),
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::Auto);
        assert_eq!(pairs(&rec), vec![p("Q1", "A1"), p("Q2", "A2")]);
    }

    #[test]
    fn test_ordering_follows_row_id_not_input_order() {
        let rows = vec![
            row(4, MessageRole::Assistant, Some("Q2"), Some("A2")),
            row(2, MessageRole::Assistant, Some("Q1"), Some("A1")),
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::Auto);
        assert_eq!(pairs(&rec), vec![p("Q1", "A1"), p("Q2", "A2")]);
    }

    #[test]
    fn test_summary_row_hides_covered_turns() {
        let mut summary = row(10, MessageRole::Assistant, Some("[CONVERSATION SUMMARY]"), Some("S"));
        summary.meta = Some(serde_json::json!({
            "is_summary": true,
            "summarized_turn_count": 2,
            "covers_through_id": 4
        }));
        let rows = vec![
            row(2, MessageRole::Assistant, Some("Q1"), Some("A1")),
            row(4, MessageRole::Assistant, Some("Q2"), Some("A2")),
            row(6, MessageRole::Assistant, Some("Q3"), Some("A3")),
            summary,
            row(11, MessageRole::Assistant, Some("Q4"), Some("A4")),
        ];
        let rec = reconstruct("42", &rows, ReconstructionStrategy::Auto);
        let stored = rec.summary.clone().unwrap();
        assert_eq!(stored.summarized_turn_count, 2);
        assert_eq!(stored.covers_through_id, 4);
        assert_eq!(pairs(&rec), vec![p("Q3", "A3"), p("Q4", "A4")]);

        let turn = stored.to_turn("42");
        assert!(turn.is_summary());
        assert_eq!(turn.summarized_turn_count(), Some(2));
    }

    #[test]
    fn test_newest_summary_wins() {
        let mut old = row(5, MessageRole::Assistant, None, Some("old"));
        old.meta = Some(serde_json::json!({"is_summary": true, "message_count": 3}));
        let mut new = row(9, MessageRole::Assistant, None, Some("new"));
        new.meta = Some(serde_json::json!({"is_summary": true, "summarized_turn_count": 6, "covers_through_id": 8}));
        let rows = vec![old, row(8, MessageRole::Assistant, Some("Q"), Some("A")), new];

        let rec = reconstruct("42", &rows, ReconstructionStrategy::Auto);
        let stored = rec.summary.unwrap();
        assert_eq!(stored.text, "new");
        assert_eq!(stored.summarized_turn_count, 6);
        assert!(rec.turns.is_empty());
    }
}
