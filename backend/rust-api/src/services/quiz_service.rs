use std::sync::Arc;

use super::generation_cache::{
    char_prefix, CacheAsideError, Cached, GenerationCache, GenerationRequest,
};
use super::generation_client::{generate_bounded, retry_policy, GenerationError, TextGenerator};
use super::prompts::{hint_prompt, parse_quiz, quiz_prompt, HINT_FALLBACK};
use super::AppState;
use crate::config::{GenerationSettings, QuizSettings};
use crate::error::ApiError;
use crate::models::quiz::{CreateQuizRequest, Hint, HintRecord, HintRequest, Quiz, QuizSummary};
use crate::storage::{RecordStore, StoreError};
use crate::utils::time::Clock;

const DEFAULT_DIFFICULTY: &str = "medium";
/// Length of the question prefix stored with a persisted hint.
const HINT_RECORD_PREFIX_LEN: usize = 50;

pub struct QuizService {
    store: Arc<dyn RecordStore>,
    generator: Arc<dyn TextGenerator>,
    generation_cache: Arc<GenerationCache>,
    clock: Arc<dyn Clock>,
    generation: GenerationSettings,
    quiz: QuizSettings,
}

impl QuizService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            generator: state.generator.clone(),
            generation_cache: state.generation_cache.clone(),
            clock: state.clock.clone(),
            generation: state.config.generation.clone(),
            quiz: state.config.quiz.clone(),
        }
    }

    /// Returns the quiz for (grade, subject, difficulty), generating and
    /// storing one on a cache miss.
    pub async fn create_quiz(&self, req: CreateQuizRequest) -> Result<Cached<Quiz>, ApiError> {
        let difficulty = req
            .difficulty
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DIFFICULTY)
            .to_lowercase();
        let total_questions = req.total_questions.unwrap_or(self.quiz.default_question_count);
        if total_questions > self.quiz.max_question_count {
            return Err(ApiError::validation(format!(
                "total_questions must be at most {}",
                self.quiz.max_question_count
            )));
        }

        let grade_level = req.grade_level.trim().to_string();
        let subject = req.subject.trim().to_string();
        let request = GenerationRequest::quiz(&grade_level, &subject, &difficulty);

        let generator = self.generator.clone();
        let clock = self.clock.clone();
        let timeout = self.generation.timeout();
        let retry = retry_policy(&self.generation);
        let store = self.store.clone();

        let cached = self
            .generation_cache
            .get_or_generate(
                &request,
                || async move {
                    let prompt = quiz_prompt(&grade_level, &subject, &difficulty, total_questions);
                    let raw = generate_bounded(generator.as_ref(), &prompt, timeout, retry).await?;
                    let generated = parse_quiz(&raw)?;

                    let title = generated
                        .title
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| format!("{} Quiz for Grade {}", subject, grade_level));
                    let count = generated.questions.len() as u32;

                    Ok::<_, GenerationError>(Quiz {
                        id: uuid::Uuid::new_v4().to_string(),
                        title,
                        grade_level,
                        subject,
                        difficulty,
                        total_questions: count,
                        max_score: count,
                        questions: generated.questions,
                        created_at: clock.now(),
                    })
                },
                |quiz: Quiz| async move {
                    store.insert_quiz(&quiz).await?;
                    tracing::info!(quiz_id = %quiz.id, questions = quiz.question_count(), "Quiz stored");
                    Ok::<_, StoreError>(quiz)
                },
            )
            .await?;

        Ok(cached)
    }

    /// Hint text for a question. Generation failures produce a generic hint
    /// that is neither cached nor stored.
    pub async fn get_hint(&self, req: HintRequest) -> Result<String, ApiError> {
        let request = GenerationRequest::hint(&req.quiz_id, &req.question, self.quiz.hint_prefix_len);

        let generator = self.generator.clone();
        let timeout = self.generation.timeout();
        let retry = retry_policy(&self.generation);
        let store = self.store.clone();
        let clock = self.clock.clone();
        let question = req.question.clone();
        let quiz_id = req.quiz_id.clone();
        let question_id = char_prefix(&req.question, HINT_RECORD_PREFIX_LEN);

        let result = self
            .generation_cache
            .get_or_generate(
                &request,
                || async move {
                    let text =
                        generate_bounded(generator.as_ref(), &hint_prompt(&question), timeout, retry)
                            .await?;
                    Ok::<_, GenerationError>(Hint { text })
                },
                |hint: Hint| async move {
                    let record = HintRecord {
                        id: uuid::Uuid::new_v4().to_string(),
                        quiz_id,
                        question_id,
                        hint_text: hint.text.clone(),
                        created_at: clock.now(),
                    };
                    store.insert_hint(&record).await?;
                    Ok::<_, StoreError>(hint)
                },
            )
            .await;

        match result {
            Ok(cached) => Ok(cached.value.text),
            Err(CacheAsideError::Generation(e)) => {
                tracing::warn!(quiz_id = %req.quiz_id, error = %e, "Hint generation failed, using fallback");
                Ok(HINT_FALLBACK.to_string())
            }
            Err(CacheAsideError::Store(e)) => Err(e.into()),
        }
    }

    pub async fn list_quizzes(&self) -> Result<Vec<QuizSummary>, ApiError> {
        Ok(self.store.list_quizzes().await?)
    }
}
