//! Prompt templates for the generation provider and parsing of its replies.

use super::generation_client::{GenerationError, Prompt, PromptKind};
use crate::models::quiz::GeneratedQuiz;

pub const HINT_FALLBACK: &str =
    "Sorry, couldn't generate a hint for this question. Try reviewing the related concepts.";

pub const SUGGESTIONS_FALLBACK: &str =
    "1. Review the quiz material thoroughly\n2. Practice similar questions to reinforce understanding";

pub fn quiz_prompt(grade_level: &str, subject: &str, difficulty: &str, total_questions: u32) -> Prompt {
    let text = format!(
        r#"As an expert quiz generator, create a {difficulty} level quiz for grade {grade_level} about {subject}.
Generate exactly {total_questions} multiple-choice questions with:
- Clear question text
- 4 options (a-d)
- Correct answer index (0-3)
- Brief explanation

Return valid JSON format:
{{
  "title": "Quiz Title",
  "questions": [
    {{
      "question": "...",
      "options": ["...", "...", "...", "..."],
      "answer": 0,
      "explanation": "..."
    }}
  ]
}}"#
    );

    Prompt {
        kind: PromptKind::Quiz,
        text,
        temperature: 0.7,
        max_tokens: 2000,
        json_response: true,
    }
}

pub fn hint_prompt(question: &str) -> Prompt {
    let text = format!(
        "Provide a helpful hint for the following quiz question without giving away the answer:
Question: {question}

The hint should:
- Be 1-2 sentences
- Guide the student toward the correct thinking
- Not reveal the answer directly

Return just the hint text without any additional formatting or explanation."
    );

    Prompt {
        kind: PromptKind::Hint,
        text,
        temperature: 0.5,
        max_tokens: 100,
        json_response: false,
    }
}

/// Suggestions for the result email. Only asked for when something was answered wrong.
pub fn suggestions_prompt(quiz_title: &str, score: u32, total: u32, weak_areas: &[String]) -> Prompt {
    let text = format!(
        "The student scored {score}/{total} on a {quiz_title} quiz.
They struggled with these areas: {}.
Provide 2-3 specific suggestions to improve in these areas, formatted as bullet points.",
        weak_areas.join(", ")
    );

    Prompt {
        kind: PromptKind::Suggestions,
        text,
        temperature: 0.3,
        max_tokens: 300,
        json_response: false,
    }
}

/// Parses a quiz reply, tolerating a markdown code fence around the JSON.
pub fn parse_quiz(raw: &str) -> Result<GeneratedQuiz, GenerationError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| GenerationError::InvalidOutput(e.to_string()))
}
