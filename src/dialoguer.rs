use std::fmt;

use dialoguer::{console::Term, theme::ColorfulTheme, Confirm};
use error_stack::{IntoReport, ResultExt};

#[derive(Debug)]
pub struct DialoguerError;

impl fmt::Display for DialoguerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dialoguer error")
    }
}

impl std::error::Error for DialoguerError {}

pub type DialoguerResult<T> = error_stack::Result<T, DialoguerError>;

#[derive(Debug, Clone)]
pub struct Dialoguer;

impl Dialoguer {
    pub fn confirm(prompt_text: String) -> DialoguerResult<bool> {
        let colorful_theme = &ColorfulTheme::default();
        let answer = Confirm::with_theme(colorful_theme)
            .with_prompt(&prompt_text)
            .default(false)
            .interact_on(&Term::stderr())
            .into_report()
            .change_context(DialoguerError)?;
        Ok(answer)
    }
}
