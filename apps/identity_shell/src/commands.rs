use shared::{
    domain::ProviderKind,
    protocol::{SessionEvent, SessionIntent},
};

/// One line typed into the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Email(String),
    Password(String),
    EditProfile,
    DisplayName(String),
    CancelEdit,
    OpenProtected,
    OpenProfile,
    State,
    Intent(SessionIntent),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  email <addr>         set the login form email
  password <pw>        set the login form password
  login | forgot | link
  google <token>       sign in with a Google id token
  unlink <provider>    password | google
  delete | signout
  edit | name <text> | save | cancel
  protected | profile  open a guarded screen
  state | help | quit";

fn parse_provider(raw: &str) -> Option<ProviderKind> {
    match raw {
        "google" => Some(ProviderKind::Google),
        other => ProviderKind::from_provider_id(other),
    }
}

pub fn parse(line: &str) -> Result<ShellCommand, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match head {
        "email" => ShellCommand::Email(rest.to_string()),
        "password" => ShellCommand::Password(rest.to_string()),
        "login" => ShellCommand::Intent(SessionIntent::SubmitLogin),
        "forgot" => ShellCommand::Intent(SessionIntent::ForgotPassword),
        "link" => ShellCommand::Intent(SessionIntent::LinkAccount),
        "google" if !rest.is_empty() => ShellCommand::Intent(SessionIntent::SocialSignIn {
            provider: ProviderKind::Google,
            token: rest.to_string(),
        }),
        "google" => return Err("usage: google <token>".to_string()),
        "unlink" => {
            let provider =
                parse_provider(rest).ok_or_else(|| format!("unknown provider '{rest}'"))?;
            ShellCommand::Intent(SessionIntent::UnlinkProvider { provider })
        }
        "delete" => ShellCommand::Intent(SessionIntent::DeleteAccount),
        "signout" => ShellCommand::Intent(SessionIntent::SignOut),
        "edit" => ShellCommand::EditProfile,
        "name" => ShellCommand::DisplayName(rest.to_string()),
        "save" => ShellCommand::Intent(SessionIntent::SaveProfile),
        "cancel" => ShellCommand::CancelEdit,
        "protected" => ShellCommand::OpenProtected,
        "profile" => ShellCommand::OpenProfile,
        "state" => ShellCommand::State,
        "help" | "" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(command)
}

/// User messages print as their text; everything else as JSON.
pub fn render_event(event: &SessionEvent) -> serde_json::Result<String> {
    match event {
        SessionEvent::Message(message) => Ok(format!("message: {}", message.text())),
        other => Ok(format!("event {}", serde_json::to_string(other)?)),
    }
}

#[cfg(test)]
mod tests {
    use shared::protocol::{Route, UserMessage};

    use super::*;

    #[test]
    fn parses_form_edits_with_their_argument() {
        assert_eq!(
            parse("email  alice@example.com "),
            Ok(ShellCommand::Email("alice@example.com".into()))
        );
        assert_eq!(parse("password"), Ok(ShellCommand::Password(String::new())));
    }

    #[test]
    fn parses_intents() {
        assert_eq!(
            parse("google tok-1"),
            Ok(ShellCommand::Intent(SessionIntent::SocialSignIn {
                provider: ProviderKind::Google,
                token: "tok-1".into(),
            }))
        );
        assert_eq!(
            parse("unlink google.com"),
            Ok(ShellCommand::Intent(SessionIntent::UnlinkProvider {
                provider: ProviderKind::Google,
            }))
        );
        assert_eq!(
            parse("signout"),
            Ok(ShellCommand::Intent(SessionIntent::SignOut))
        );
    }

    #[test]
    fn renders_messages_as_text() {
        let rendered = render_event(&SessionEvent::Message(UserMessage::LinkFailed))
            .expect("render message");
        assert_eq!(rendered, "message: Could not link this account.");

        let rendered = render_event(&SessionEvent::Navigate {
            open: Route::Settings,
            pop_up: Route::Login,
        })
        .expect("render navigation");
        assert!(rendered.starts_with("event {\"type\":\"navigate\""));
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse("unlink github").is_err());
        assert!(parse("google").is_err());
        assert!(parse("dance").is_err());
    }
}
