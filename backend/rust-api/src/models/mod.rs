pub mod identity;
pub mod notification;
pub mod quiz;
pub mod submission;

pub use identity::Identity;
pub use notification::NotificationRecord;
pub use quiz::{AnswerValue, HintRecord, Question, Quiz, QuizSummary};
pub use submission::{QuestionResult, Submission, SubmissionFilter};
