//! The sign-up flow for the mobile client.
//!
//! Accounts are managed by an external identity provider. Signing up takes
//! three states:
//!
//! ```text
//! Unauthenticated --sign_up--> AwaitingVerification --verify--> Authenticated
//! ```
//!
//! Each state is its own type and each transition consumes the state it
//! starts from, so for example a code cannot be verified before an account
//! has been created. A failed transition hands the original state back
//! alongside the error so the user can try again.

use std::future::Future;

/// The kinds of error an identity provider reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// An account already exists for the email address.
    IdentifierExists,
    /// The email verification code was wrong or has expired.
    IncorrectCode,
    /// The verification was accepted but the provider needs more steps
    /// before it will create a session.
    VerificationIncomplete,
    /// Anything else, e.g. a network failure.
    Other,
}

impl IdentityErrorKind {
    /// The message to show the user for this kind of error.
    pub fn user_message(&self) -> &'static str {
        match self {
            IdentityErrorKind::IdentifierExists => "That email address is already in use.",
            IdentityErrorKind::IncorrectCode => "The verification code is incorrect.",
            IdentityErrorKind::VerificationIncomplete => {
                "Verification is not complete. Please try again."
            }
            IdentityErrorKind::Other => "An error occurred. Please try again.",
        }
    }
}

/// An error returned by an [IdentityProvider].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {detail}")]
pub struct IdentityError {
    /// What went wrong.
    pub kind: IdentityErrorKind,
    /// The provider's own description, for logging only.
    pub detail: String,
}

impl IdentityError {
    /// Create an error of `kind`.
    pub fn new(kind: IdentityErrorKind, detail: &str) -> Self {
        Self {
            kind,
            detail: detail.to_owned(),
        }
    }

    /// The message to show the user.
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

/// The result of submitting an email verification code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    /// The account is verified and a session was created.
    Complete {
        /// The provider's ID for the new session.
        session_id: String,
    },
    /// The provider needs further steps before it will create a session.
    Incomplete,
}

/// The calls the sign-up flow makes to the external identity provider.
pub trait IdentityProvider {
    /// Start creating an account for `email` with `password`.
    fn create_sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), IdentityError>> + Send;

    /// Email a verification code to the address given to [IdentityProvider::create_sign_up].
    fn prepare_email_verification(&self) -> impl Future<Output = Result<(), IdentityError>> + Send;

    /// Submit the verification code the user received.
    fn attempt_email_verification(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<VerificationStatus, IdentityError>> + Send;

    /// Save the user's chosen username in the account's public metadata.
    fn update_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<(), IdentityError>> + Send;

    /// Make `session_id` the client's active session.
    fn set_active_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<(), IdentityError>> + Send;
}

/// What the user enters on the sign-up screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpDetails {
    /// The name to show in the app.
    pub username: String,
    /// The email address to sign up with.
    pub email: String,
    /// The password for the new account.
    pub password: String,
}

/// The user has not signed up or signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unauthenticated;

/// An account was created and the user must enter the emailed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwaitingVerification {
    /// The email address the code was sent to.
    pub email: String,
    username: String,
}

/// The user is signed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// The provider's ID for the active session.
    pub session_id: String,
}

impl Unauthenticated {
    /// Create the account and send the verification email.
    ///
    /// # Errors
    /// Returns this state and the provider's error if either call fails.
    pub async fn sign_up<P: IdentityProvider>(
        self,
        provider: &P,
        details: SignUpDetails,
    ) -> Result<AwaitingVerification, (Self, IdentityError)> {
        if let Err(error) = provider
            .create_sign_up(&details.email, &details.password)
            .await
        {
            tracing::error!("Could not create sign up: {error}");
            return Err((self, error));
        }

        if let Err(error) = provider.prepare_email_verification().await {
            tracing::error!("Could not send verification email: {error}");
            return Err((self, error));
        }

        Ok(AwaitingVerification {
            email: details.email,
            username: details.username,
        })
    }
}

impl AwaitingVerification {
    /// Submit the verification code and start a session.
    ///
    /// Saving the username happens after the account is verified. If it
    /// fails the user is still signed in and the failure is only logged.
    ///
    /// # Errors
    /// Returns this state and an error if the code is rejected, the provider
    /// needs further steps or the new session cannot be made active.
    pub async fn verify<P: IdentityProvider>(
        self,
        provider: &P,
        code: &str,
    ) -> Result<Authenticated, (Self, IdentityError)> {
        let session_id = match provider.attempt_email_verification(code).await {
            Ok(VerificationStatus::Complete { session_id }) => session_id,
            Ok(VerificationStatus::Incomplete) => {
                tracing::warn!("Verification for {} did not complete", self.email);
                let error = IdentityError::new(
                    IdentityErrorKind::VerificationIncomplete,
                    "sign up status is not complete",
                );
                return Err((self, error));
            }
            Err(error) => {
                tracing::error!("Could not verify {}: {error}", self.email);
                return Err((self, error));
            }
        };

        if let Err(error) = provider.update_username(&self.username).await {
            tracing::warn!("Could not save username for {}: {error}", self.email);
        }

        if let Err(error) = provider.set_active_session(&session_id).await {
            tracing::error!("Could not activate session for {}: {error}", self.email);
            return Err((self, error));
        }

        Ok(Authenticated { session_id })
    }
}
