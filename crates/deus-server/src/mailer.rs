/// Outgoing mail. There is no SMTP relay configured, so messages are written
/// to the log where an operator can pick them up.
#[derive(Debug, Clone, Default)]
pub struct Mailer;

impl Mailer {
    pub fn send_password_reset(&self, email: &str, token: &str, expires_in_secs: i64) {
        tracing::info!(
            to = email,
            expires_in_secs,
            "Password reset requested; run `deus-tui --reset-token {}`",
            token
        );
    }
}
