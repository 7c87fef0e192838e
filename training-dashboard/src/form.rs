//! Training parameter form with per-field validation.
//!
//! Holds raw text for each field so the user can type freely; conversion to
//! [`TrainingParams`] happens in [`ParamForm::validate`], which reports every
//! bad field at once before any request is made.

use std::collections::BTreeMap;

use crate::client::TrainingParams;

/// Editable fields, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    VocabSize,
    EmbedSize,
    NumHeads,
    NumSteps,
    TrainSentence,
    PairSentence,
}

impl Field {
    pub fn all() -> &'static [Field] {
        &[
            Field::VocabSize,
            Field::EmbedSize,
            Field::NumHeads,
            Field::NumSteps,
            Field::TrainSentence,
            Field::PairSentence,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VocabSize => "VOCAB_SIZE",
            Self::EmbedSize => "EMBED_SIZE",
            Self::NumHeads => "NUM_HEADS",
            Self::NumSteps => "NUM_STEPS",
            Self::TrainSentence => "train sentence",
            Self::PairSentence => "pair sentence",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::TrainSentence | Self::PairSentence)
    }

    fn index(&self) -> usize {
        Self::all().iter().position(|f| f == self).unwrap_or(0)
    }
}

/// Per-field validation messages.
pub type FieldErrors = BTreeMap<Field, &'static str>;

/// Form state: raw field text, focus, and the last validation result.
#[derive(Debug, Clone)]
pub struct ParamForm {
    values: BTreeMap<Field, String>,
    focus: Field,
    errors: FieldErrors,
}

impl Default for ParamForm {
    fn default() -> Self {
        Self::from_params(&TrainingParams::default())
    }
}

impl ParamForm {
    /// Prefill the form from existing parameters.
    pub fn from_params(params: &TrainingParams) -> Self {
        let values = BTreeMap::from([
            (Field::VocabSize, params.vocab_size.to_string()),
            (Field::EmbedSize, params.embed_size.to_string()),
            (Field::NumHeads, params.num_heads.to_string()),
            (Field::NumSteps, params.num_steps.to_string()),
            (Field::TrainSentence, params.train_sentence.clone()),
            (Field::PairSentence, params.pair_sentence.clone()),
        ]);
        Self {
            values,
            focus: Field::VocabSize,
            errors: FieldErrors::new(),
        }
    }

    pub fn value(&self, field: Field) -> &str {
        self.values.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn set_value(&mut self, field: Field, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn focus(&self) -> Field {
        self.focus
    }

    pub fn focus_next(&mut self) {
        let all = Field::all();
        self.focus = all[(self.focus.index() + 1) % all.len()];
    }

    pub fn focus_previous(&mut self) {
        let all = Field::all();
        self.focus = all[(self.focus.index() + all.len() - 1) % all.len()];
    }

    /// Type a character into the focused field. Numeric fields accept digits only.
    pub fn input_char(&mut self, c: char) {
        if self.focus.is_numeric() && !c.is_ascii_digit() {
            return;
        }
        self.values.entry(self.focus).or_default().push(c);
        self.errors.remove(&self.focus);
    }

    /// Delete the last character of the focused field.
    pub fn backspace(&mut self) {
        if let Some(value) = self.values.get_mut(&self.focus) {
            value.pop();
        }
    }

    /// Errors from the last [`validate`](Self::validate) call.
    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Convert to [`TrainingParams`], recording per-field errors on failure.
    pub fn validate(&mut self) -> Result<TrainingParams, FieldErrors> {
        let mut errors = FieldErrors::new();

        let mut number = |field: Field| -> u64 {
            let raw = self.value(field).trim();
            if raw.is_empty() {
                errors.insert(field, "Required");
                return 0;
            }
            match raw.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    errors.insert(field, "Must be a positive integer");
                    0
                }
            }
        };
        let vocab_size = number(Field::VocabSize);
        let embed_size = number(Field::EmbedSize);
        let num_heads = number(Field::NumHeads);
        let num_steps = number(Field::NumSteps);

        let mut text = |field: Field| -> String {
            let raw = self.value(field).trim();
            if raw.is_empty() {
                errors.insert(field, "Required");
            }
            raw.to_string()
        };
        let train_sentence = text(Field::TrainSentence);
        let pair_sentence = text(Field::PairSentence);

        self.errors = errors.clone();
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(TrainingParams {
            vocab_size,
            embed_size,
            num_heads,
            num_steps,
            train_sentence,
            pair_sentence,
        })
    }
}
