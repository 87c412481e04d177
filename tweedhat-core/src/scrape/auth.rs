use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{wait_for_first, HumanCadence, Probe, ScrapePage};
use crate::config::{AuthSection, MarkerSection};

const IDENTIFIER_INPUTS: [&str; 2] = ["input[name='text']", "input[autocomplete='username']"];
const PASSWORD_INPUTS: [&str; 2] = ["input[name='password']", "input[type='password']"];
const HOME_MARKER: &str = "div[data-testid='primaryColumn']";
const ALERTS: &str = "div[role='alert']";
const NEXT_LABEL: &str = "Next";
const LOGIN_LABEL: &str = "Log in";
const USE_PHONE_LABEL: &str = "Use phone instead";

#[derive(Clone)]
pub struct Credentials {
    identifier: String,
    password: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
        }
    }

    /// Both parts present and non-blank.
    pub fn from_parts(identifier: Option<String>, password: Option<String>) -> Option<Self> {
        match (identifier, password) {
            (Some(identifier), Some(password))
                if !identifier.trim().is_empty() && !password.is_empty() =>
            {
                Some(Self::new(identifier.trim(), password))
            }
            _ => None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Username asked for on the confirmation step: the local part of an
    /// email identifier, the identifier itself otherwise.
    pub fn username_hint(&self) -> &str {
        match self.identifier.split_once('@') {
            Some((local, _)) if !local.is_empty() => local,
            _ => &self.identifier,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    IdentifierInputMissing,
    VerificationRequired,
    PasswordInputMissing,
    TwoFactorRequired,
    Rejected { alerts: Vec<String> },
    HomeMarkerMissing,
}

impl AuthFailure {
    /// Failures a human has to resolve in a real browser; never retried.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(
            self,
            AuthFailure::VerificationRequired | AuthFailure::TwoFactorRequired
        )
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::IdentifierInputMissing => f.write_str("login identifier input not found"),
            AuthFailure::VerificationRequired => f.write_str("identity verification required"),
            AuthFailure::PasswordInputMissing => f.write_str("password input not found"),
            AuthFailure::TwoFactorRequired => f.write_str("two-factor code required"),
            AuthFailure::Rejected { alerts } => {
                write!(f, "login rejected: {}", alerts.join(" | "))
            }
            AuthFailure::HomeMarkerMissing => f.write_str("home timeline never appeared"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    EnterIdentifier,
    ChallengeCheck,
    UsernameConfirm,
    EnterPassword,
    Submit,
    Success,
    Failed(AuthFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    pub reason: String,
    pub failure: Option<AuthFailure>,
}

impl AuthOutcome {
    fn succeeded() -> Self {
        Self {
            success: true,
            reason: "logged in".to_string(),
            failure: None,
        }
    }

    fn failed(failure: AuthFailure) -> Self {
        Self {
            success: false,
            reason: failure.to_string(),
            failure: Some(failure),
        }
    }
}

/// Credential entry against the origin login flow.
///
/// Each state is a separate step and transitions only move forward. Page
/// errors inside a step count as misses; the flow itself never errors.
pub struct AuthenticationFlow<'a> {
    config: &'a AuthSection,
    markers: &'a MarkerSection,
    credentials: &'a Credentials,
}

impl<'a> AuthenticationFlow<'a> {
    pub fn new(
        config: &'a AuthSection,
        markers: &'a MarkerSection,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            config,
            markers,
            credentials,
        }
    }

    pub async fn run(&self, page: &mut dyn ScrapePage, cadence: &mut HumanCadence) -> AuthOutcome {
        info!(identifier = %self.credentials.identifier(), "Attempting login");
        let mut state = AuthState::EnterIdentifier;
        loop {
            state = match state {
                AuthState::EnterIdentifier => self.enter_identifier(page, cadence).await,
                AuthState::ChallengeCheck => self.challenge_check(page, cadence).await,
                AuthState::UsernameConfirm => self.username_confirm(page, cadence).await,
                AuthState::EnterPassword => self.enter_password(page, cadence).await,
                AuthState::Submit => self.submit(page, cadence).await,
                AuthState::Success => {
                    info!("Login successful");
                    return AuthOutcome::succeeded();
                }
                AuthState::Failed(failure) => {
                    warn!(reason = %failure, "Login failed");
                    return AuthOutcome::failed(failure);
                }
            };
            debug!(state = ?state, "auth transition");
        }
    }

    async fn enter_identifier(
        &self,
        page: &mut dyn ScrapePage,
        cadence: &mut HumanCadence,
    ) -> AuthState {
        if let Err(err) = page.goto(&self.config.login_url).await {
            warn!(error = %err, "Failed to open login page");
        }
        let probes = IDENTIFIER_INPUTS.map(Probe::Selector);
        let timeout = secs(self.config.identifier_timeout_seconds);
        let Some(idx) = wait_for_first(page, &probes, timeout, cadence.poll_interval()).await
        else {
            page.screenshot("login_form_not_found").await;
            page.dump_html("login_form_not_found").await;
            return AuthState::Failed(AuthFailure::IdentifierInputMissing);
        };
        let input = IDENTIFIER_INPUTS[idx];
        if let Err(err) = cadence
            .type_text(page, input, self.credentials.identifier())
            .await
        {
            warn!(error = %err, "Typing identifier failed");
            page.screenshot("login_identifier_typing").await;
            return AuthState::Failed(AuthFailure::IdentifierInputMissing);
        }
        cadence.pause().await;
        submit_with(page, input, NEXT_LABEL).await;
        AuthState::ChallengeCheck
    }

    async fn challenge_check(
        &self,
        page: &mut dyn ScrapePage,
        cadence: &mut HumanCadence,
    ) -> AuthState {
        let verification = self.markers.identity_verification.len();
        let probes: Vec<Probe<'_>> = self
            .markers
            .identity_verification
            .iter()
            .chain(&self.markers.confirm_email)
            .map(|marker| Probe::Text(marker.as_str()))
            .collect();
        let timeout = secs(self.config.challenge_timeout_seconds);
        match wait_for_first(page, &probes, timeout, cadence.poll_interval()).await {
            Some(idx) if idx < verification => {
                page.screenshot("verification_required").await;
                AuthState::Failed(AuthFailure::VerificationRequired)
            }
            Some(_) => {
                warn!("Login flow asks to confirm the account email");
                page.screenshot("confirm_email").await;
                match page.click_control_with_text(USE_PHONE_LABEL).await {
                    Ok(true) => info!("Switched confirmation to phone"),
                    Ok(false) => warn!("No phone confirmation option offered"),
                    Err(err) => warn!(error = %err, "Phone confirmation option lookup failed"),
                }
                cadence.pause().await;
                AuthState::UsernameConfirm
            }
            None => AuthState::UsernameConfirm,
        }
    }

    async fn username_confirm(
        &self,
        page: &mut dyn ScrapePage,
        cadence: &mut HumanCadence,
    ) -> AuthState {
        let probes: Vec<Probe<'_>> = PASSWORD_INPUTS
            .iter()
            .chain(IDENTIFIER_INPUTS.iter())
            .map(|selector| Probe::Selector(*selector))
            .collect();
        let timeout = secs(self.config.username_confirm_timeout_seconds);
        let Some(idx) = wait_for_first(page, &probes, timeout, cadence.poll_interval()).await
        else {
            return AuthState::EnterPassword;
        };
        if idx < PASSWORD_INPUTS.len() {
            return AuthState::EnterPassword;
        }
        let input = IDENTIFIER_INPUTS[idx - PASSWORD_INPUTS.len()];
        info!("Username confirmation requested");
        match cadence
            .type_text(page, input, self.credentials.username_hint())
            .await
        {
            Ok(()) => {
                cadence.pause().await;
                submit_with(page, input, NEXT_LABEL).await;
            }
            Err(err) => warn!(error = %err, "Typing username confirmation failed"),
        }
        AuthState::EnterPassword
    }

    async fn enter_password(
        &self,
        page: &mut dyn ScrapePage,
        cadence: &mut HumanCadence,
    ) -> AuthState {
        let probes = PASSWORD_INPUTS.map(Probe::Selector);
        let timeout = secs(self.config.password_timeout_seconds);
        let Some(idx) = wait_for_first(page, &probes, timeout, cadence.poll_interval()).await
        else {
            page.screenshot("password_field_not_found").await;
            page.dump_html("password_field_not_found").await;
            let on_challenge = page
                .current_url()
                .await
                .map(|url| url.contains("challenge"))
                .unwrap_or(false);
            return if on_challenge {
                AuthState::Failed(AuthFailure::VerificationRequired)
            } else {
                AuthState::Failed(AuthFailure::PasswordInputMissing)
            };
        };
        let input = PASSWORD_INPUTS[idx];
        if let Err(err) = cadence
            .type_text(page, input, &self.credentials.password)
            .await
        {
            warn!(error = %err, "Typing password failed");
            return AuthState::Failed(AuthFailure::PasswordInputMissing);
        }
        cadence.pause().await;
        submit_with(page, input, LOGIN_LABEL).await;
        AuthState::Submit
    }

    async fn submit(&self, page: &mut dyn ScrapePage, cadence: &mut HumanCadence) -> AuthState {
        let probes = [Probe::Selector(HOME_MARKER)];
        let timeout = secs(self.config.home_timeout_seconds);
        if wait_for_first(page, &probes, timeout, cadence.poll_interval())
            .await
            .is_some()
        {
            page.save_cookies().await;
            return AuthState::Success;
        }

        page.screenshot("login_failed").await;
        for marker in &self.markers.two_factor {
            if page.text_present(marker).await.unwrap_or(false) {
                return AuthState::Failed(AuthFailure::TwoFactorRequired);
            }
        }
        let alerts = page.element_texts(ALERTS).await.unwrap_or_default();
        if !alerts.is_empty() {
            for alert in &alerts {
                warn!(alert = %alert, "Login alert shown");
            }
            return AuthState::Failed(AuthFailure::Rejected { alerts });
        }
        AuthState::Failed(AuthFailure::HomeMarkerMissing)
    }
}

/// Clicks the labelled control, falling back to Enter in `input`.
async fn submit_with(page: &mut dyn ScrapePage, input: &str, label: &str) {
    match page.click_control_with_text(label).await {
        Ok(true) => debug!(label, "clicked control"),
        Ok(false) | Err(_) => {
            if let Err(err) = page.press_enter(input).await {
                warn!(error = %err, "Submitting with Enter failed");
            }
        }
    }
}

fn secs(seconds: u64) -> Duration {
    Duration::from_secs(seconds)
}
