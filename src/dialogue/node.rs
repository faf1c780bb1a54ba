use serde::Deserialize;

/// A single question in a page's dialogue graph.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuestionNode {
    /// Unique identifier within the page graph (e.g. "q1").
    pub id: String,
    /// The line the bot says when this question becomes current.
    pub text: String,
    /// Buttons offered to the visitor, in display order.
    #[serde(default)]
    pub options: Vec<AnswerOption>,
}

/// One selectable answer button under a question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub label: String,
    #[serde(default)]
    pub next_question_id: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

/// What selecting an option does, after precedence is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionAction<'a> {
    /// Reply with a canned answer and stay on the current question.
    Answer(&'a str),
    /// Move to another question.
    Goto(&'a str),
    /// Terminal leaf with nothing attached.
    Noop,
}

impl AnswerOption {
    pub fn answer(label: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            next_question_id: None,
            answer: Some(answer.into()),
        }
    }

    pub fn goto(label: impl Into<String>, next_question_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            next_question_id: Some(next_question_id.into()),
            answer: None,
        }
    }

    /// Resolve the option's behaviour. `answer` wins over `next_question_id`
    /// when both are authored, and empty strings count as absent.
    pub fn action(&self) -> OptionAction<'_> {
        if let Some(answer) = present(&self.answer) {
            OptionAction::Answer(answer)
        } else if let Some(next) = present(&self.next_question_id) {
            OptionAction::Goto(next)
        } else {
            OptionAction::Noop
        }
    }

    /// True when both an answer and a next question are authored.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            (&self.answer, &self.next_question_id),
            (Some(a), Some(n)) if !a.is_empty() && !n.is_empty()
        )
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}
