use async_trait::async_trait;
use devkit_auth::{Prompt, PromptOption, TextInputSpec};
use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password, Select};
use tracing::warn;

const DISMISS_ACTION: &str = "Dismiss";

/// One line of the selection list. Group headers carry no label and cannot be
/// chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChoiceRow {
    text: String,
    label: Option<String>,
}

fn choice_rows(options: &[PromptOption]) -> Vec<ChoiceRow> {
    let mut rows = Vec::with_capacity(options.len());
    for option in options {
        if let Some(group) = &option.group_separator {
            rows.push(ChoiceRow {
                text: format!("── {group} ──"),
                label: None,
            });
        }
        rows.push(ChoiceRow {
            text: format!("  {}", option.label),
            label: Some(option.label.clone()),
        });
    }
    rows
}

fn choose_blocking(placeholder: &str, options: &[PromptOption]) -> Option<String> {
    let rows = choice_rows(options);
    let Some(first_selectable) = rows.iter().position(|row| row.label.is_some()) else {
        eprintln!("{} {placeholder}", style("?").yellow().bold());
        eprintln!("  No organizations are available for this account.");
        return None;
    };
    let items = rows.iter().map(|row| row.text.as_str()).collect::<Vec<_>>();
    let theme = ColorfulTheme::default();
    loop {
        let selection = Select::with_theme(&theme)
            .with_prompt(placeholder)
            .items(&items)
            .default(first_selectable)
            .interact_opt();
        match selection {
            Ok(Some(index)) => match rows.get(index).and_then(|row| row.label.clone()) {
                Some(label) => return Some(label),
                None => continue,
            },
            Ok(None) => return None,
            Err(error) => {
                warn!(%error, "selection prompt failed");
                return None;
            }
        }
    }
}

fn input_blocking(spec: &TextInputSpec) -> Option<String> {
    let theme = ColorfulTheme::default();
    let prompt = match &spec.placeholder {
        Some(placeholder) => format!("{} ({placeholder})", spec.prompt),
        None => spec.prompt.clone(),
    };
    let answer = if spec.password {
        Password::with_theme(&theme)
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
    } else {
        Input::<String>::with_theme(&theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
    };
    match answer {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(%error, "text prompt failed");
            None
        }
    }
}

fn show_error_blocking(message: &str, actions: &[String]) -> Option<String> {
    eprintln!("{} {message}", style("error:").red().bold());
    if actions.is_empty() {
        return None;
    }
    let mut items = actions.to_vec();
    items.push(DISMISS_ACTION.to_string());
    let selection = Select::with_theme(&ColorfulTheme::default())
        .items(&items)
        .default(items.len() - 1)
        .interact_opt();
    match selection {
        Ok(Some(index)) => actions.get(index).cloned(),
        Ok(None) => None,
        Err(error) => {
            warn!(%error, "error prompt failed");
            None
        }
    }
}

/// [`Prompt`] over the controlling terminal. Dialoguer blocks, so every call
/// runs on the blocking pool.
#[derive(Debug, Default)]
pub(crate) struct TerminalPrompt;

impl TerminalPrompt {
    pub(crate) fn new() -> Self {
        Self
    }
}

async fn run_blocking<T, F>(operation: &'static str, task: F) -> Option<T>
where
    F: FnOnce() -> Option<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(value) => value,
        Err(error) => {
            warn!(operation, %error, "terminal prompt task failed");
            None
        }
    }
}

#[async_trait]
impl Prompt for TerminalPrompt {
    async fn choose(&self, placeholder: &str, options: &[PromptOption]) -> Option<String> {
        let placeholder = placeholder.to_string();
        let options = options.to_vec();
        run_blocking("choose", move || choose_blocking(&placeholder, &options)).await
    }

    async fn input_text(&self, spec: &TextInputSpec) -> Option<String> {
        let spec = spec.clone();
        run_blocking("input_text", move || input_blocking(&spec)).await
    }

    async fn show_error(&self, message: &str, actions: &[&str]) -> Option<String> {
        let message = message.to_string();
        let actions = actions.iter().map(|action| action.to_string()).collect::<Vec<_>>();
        run_blocking("show_error", move || show_error_blocking(&message, &actions)).await
    }

    async fn open_external(&self, url: &str) {
        let url = url.to_string();
        let target = url.clone();
        let opened = run_blocking("open_external", move || Some(open::that(&target))).await;
        match opened {
            Some(Ok(())) => {}
            Some(Err(error)) => {
                warn!(%error, "failed to open browser");
                eprintln!("Open {url} in your browser to continue.");
            }
            None => eprintln!("Open {url} in your browser to continue."),
        }
    }
}
