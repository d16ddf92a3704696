use serde::Deserialize;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("catalog has no lessons")]
    Empty,

    #[error("lesson numbers must be contiguous from 1: expected {expected}, found {found}")]
    NonContiguous { expected: u32, found: u32 },

    #[error("lesson {lesson} has an empty {field}")]
    EmptyField { lesson: u32, field: &'static str },

    #[error("lesson {lesson}: accepted answer is not among the options")]
    AnswerNotInOptions { lesson: u32 },

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// One catalog entry: lesson content plus its single quiz question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Lesson {
    number: u32,
    title: String,
    content: String,
    question: String,
    #[serde(default)]
    options: Vec<String>,
    answer: String,
}

impl Lesson {
    #[must_use]
    pub fn new(
        number: u32,
        title: impl Into<String>,
        content: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            number,
            title: title.into(),
            content: content.into(),
            question: question.into(),
            options,
            answer: answer.into(),
        }
    }

    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Case-insensitive exact match against the accepted answer.
    #[must_use]
    pub fn accepts(&self, submitted: &str) -> bool {
        submitted.trim().to_lowercase() == self.answer.trim().to_lowercase()
    }
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// Static, ordered, read-only collection of lesson definitions.
///
/// Immutable after construction and safe for unsynchronized concurrent
/// reads; services share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonCatalog {
    lessons: Vec<Lesson>,
}

impl LessonCatalog {
    /// Builds a catalog, validating ordering and content.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the list is empty, lesson numbers are not
    /// contiguous from 1, any text field is blank, or an accepted answer is
    /// missing from a non-empty option list.
    pub fn from_lessons(lessons: Vec<Lesson>) -> Result<Self, CatalogError> {
        if lessons.is_empty() {
            return Err(CatalogError::Empty);
        }

        for (i, lesson) in lessons.iter().enumerate() {
            let expected = u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1);
            if lesson.number != expected {
                return Err(CatalogError::NonContiguous {
                    expected,
                    found: lesson.number,
                });
            }
            for (field, value) in [
                ("content", &lesson.content),
                ("question", &lesson.question),
                ("answer", &lesson.answer),
            ] {
                if value.trim().is_empty() {
                    return Err(CatalogError::EmptyField {
                        lesson: lesson.number,
                        field,
                    });
                }
            }
            if !lesson.options.is_empty() && !lesson.options.iter().any(|o| lesson.accepts(o)) {
                return Err(CatalogError::AnswerNotInOptions {
                    lesson: lesson.number,
                });
            }
        }

        Ok(Self { lessons })
    }

    /// Parses a catalog from its JSON representation (an array of lessons).
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Parse` on malformed JSON, or any validation
    /// error from [`LessonCatalog::from_lessons`].
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let lessons: Vec<Lesson> = serde_json::from_str(raw)?;
        Self::from_lessons(lessons)
    }

    /// Looks up a lesson by number.
    #[must_use]
    pub fn get(&self, number: u32) -> Option<&Lesson> {
        if number == 0 {
            return None;
        }
        self.lessons.get(number as usize - 1)
    }

    #[must_use]
    pub fn contains(&self, number: u32) -> bool {
        self.get(number).is_some()
    }

    /// Number of the last lesson in the catalog.
    #[must_use]
    pub fn last_number(&self) -> u32 {
        u32::try_from(self.lessons.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    /// Lesson numbers in the inclusive range that exist in the catalog,
    /// in order. Used to build the sampling window for exams.
    #[must_use]
    pub fn window(&self, from: u32, to: u32) -> Vec<u32> {
        if from == 0 || to < from {
            return Vec::new();
        }
        (from..=to).filter(|n| self.contains(*n)).collect()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(number: u32) -> Lesson {
        Lesson::new(
            number,
            format!("Lesson {number}"),
            format!("Content {number}"),
            format!("Question {number}?"),
            vec!["Yes".into(), "No".into()],
            "Yes",
        )
    }

    fn catalog(n: u32) -> LessonCatalog {
        LessonCatalog::from_lessons((1..=n).map(lesson).collect()).unwrap()
    }

    #[test]
    fn lookup_by_number_is_one_based() {
        let catalog = catalog(3);
        assert_eq!(catalog.get(1).unwrap().number(), 1);
        assert_eq!(catalog.get(3).unwrap().number(), 3);
        assert!(catalog.get(0).is_none());
        assert!(catalog.get(4).is_none());
        assert_eq!(catalog.last_number(), 3);
    }

    #[test]
    fn rejects_empty_catalog() {
        assert!(matches!(
            LessonCatalog::from_lessons(Vec::new()),
            Err(CatalogError::Empty)
        ));
    }

    #[test]
    fn rejects_non_contiguous_numbers() {
        let err = LessonCatalog::from_lessons(vec![lesson(1), lesson(3)]).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::NonContiguous {
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn rejects_blank_question() {
        let bad = Lesson::new(1, "t", "content", "   ", vec![], "a");
        let err = LessonCatalog::from_lessons(vec![bad]).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::EmptyField {
                lesson: 1,
                field: "question"
            }
        ));
    }

    #[test]
    fn rejects_answer_missing_from_options() {
        let bad = Lesson::new(
            1,
            "t",
            "c",
            "q?",
            vec!["red".into(), "blue".into()],
            "green",
        );
        let err = LessonCatalog::from_lessons(vec![bad]).unwrap_err();
        assert!(matches!(err, CatalogError::AnswerNotInOptions { lesson: 1 }));
    }

    #[test]
    fn answer_matching_is_case_insensitive_and_trimmed() {
        let l = lesson(1);
        assert!(l.accepts("yes"));
        assert!(l.accepts("  YES "));
        assert!(!l.accepts("no"));
        assert!(!l.accepts("yess"));
    }

    #[test]
    fn window_filters_to_existing_lessons() {
        let catalog = catalog(5);
        assert_eq!(catalog.window(2, 4), vec![2, 3, 4]);
        assert_eq!(catalog.window(4, 9), vec![4, 5]);
        assert!(catalog.window(0, 3).is_empty());
        assert!(catalog.window(3, 2).is_empty());
    }

    #[test]
    fn parses_catalog_from_json() {
        let raw = r#"[
            {
                "number": 1,
                "title": "Color wheels",
                "content": "Primary colors sit opposite their complements.",
                "question": "Which color complements orange?",
                "options": ["Blue", "Green"],
                "answer": "Blue"
            }
        ]"#;
        let catalog = LessonCatalog::from_json_str(raw).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get(1).unwrap().accepts("blue"));
    }

    #[test]
    fn json_options_default_to_empty() {
        let raw = r#"[
            {
                "number": 1,
                "title": "t",
                "content": "c",
                "question": "q?",
                "answer": "free text"
            }
        ]"#;
        let catalog = LessonCatalog::from_json_str(raw).unwrap();
        assert!(catalog.get(1).unwrap().options().is_empty());
    }
}
