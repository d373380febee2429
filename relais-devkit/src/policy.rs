/*!
Politique d'erreur du harness

Un callback peut échouer de trois façons :
- panic (assert!, assert_eq!...) -> échec d'assertion
- `Err` contenant un `AssertionFailed` -> échec d'assertion explicite
- tout autre `Err` -> erreur d'exécution

`ErrorPolicy::classify` décide pour chacune : propager au test ou absorber
(journalisée). `AssertionsOnly` ne propage que les assertions.

Toute panic compte comme un échec d'assertion, y compris `panic!` explicite
ou `unwrap()` sur `None` : `assert!(cond, "...")` ne laisse aucun préfixe
fiable dans le message, on ne peut donc pas les distinguer. Pour absorber une
erreur, le callback doit la retourner en `Err`.
*/

use std::any::Any;
use std::fmt;

/// Échec d'assertion signalé par un `Err` plutôt qu'une panic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("assertion failed: {message}")]
pub struct AssertionFailed {
    pub message: String,
}

impl AssertionFailed {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self { message: message.into() }
    }
}

/// Retourne `Err(AssertionFailed)` depuis un callback si la condition est fausse
#[macro_export]
macro_rules! ensure_that {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::policy::AssertionFailed::new(format!($($arg)+)).into());
        }
    };
    ($cond:expr) => {
        $crate::ensure_that!($cond, "{}", stringify!($cond))
    };
}

pub enum CallbackFailure {
    Panic {
        message: String,
        payload: Box<dyn Any + Send + 'static>,
    },
    Assertion(AssertionFailed),
    Error(anyhow::Error),
}

impl CallbackFailure {
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        CallbackFailure::Panic { message, payload }
    }

    pub fn from_error(error: anyhow::Error) -> Self {
        match error.downcast::<AssertionFailed>() {
            Ok(assertion) => CallbackFailure::Assertion(assertion),
            Err(error) => CallbackFailure::Error(error),
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, CallbackFailure::Panic { .. } | CallbackFailure::Assertion(_))
    }

    pub fn message(&self) -> String {
        match self {
            CallbackFailure::Panic { message, .. } => message.clone(),
            CallbackFailure::Assertion(assertion) => assertion.to_string(),
            CallbackFailure::Error(error) => format!("{error:#}"),
        }
    }
}

impl fmt::Debug for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackFailure::Panic { message, .. } => f.debug_struct("Panic").field("message", message).finish_non_exhaustive(),
            CallbackFailure::Assertion(assertion) => f.debug_tuple("Assertion").field(assertion).finish(),
            CallbackFailure::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Propagate,
    Absorb,
}

pub trait ErrorPolicy: Send + Sync {
    fn classify(&self, failure: &CallbackFailure) -> Disposition;
}

/// Seuls les échecs d'assertion font échouer le test ; le reste est journalisé
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionsOnly;

impl ErrorPolicy for AssertionsOnly {
    fn classify(&self, failure: &CallbackFailure) -> Disposition {
        if failure.is_assertion() {
            Disposition::Propagate
        } else {
            Disposition::Absorb
        }
    }
}

/// Tout échec remonte au test
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagateAll;

impl ErrorPolicy for PropagateAll {
    fn classify(&self, _failure: &CallbackFailure) -> Disposition {
        Disposition::Propagate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(value: u32) -> anyhow::Result<()> {
        ensure_that!(value == 1, "expected 1, got {}", value);
        Ok(())
    }

    #[test]
    fn test_assertions_only_policy() {
        let policy = AssertionsOnly;

        let panic = CallbackFailure::from_panic(Box::new("assertion `left == right` failed"));
        assert_eq!(policy.classify(&panic), Disposition::Propagate);

        let explicit = CallbackFailure::from_error(check(2).unwrap_err());
        assert!(matches!(explicit, CallbackFailure::Assertion(ref a) if a.message == "expected 1, got 2"));
        assert_eq!(policy.classify(&explicit), Disposition::Propagate);

        let other = CallbackFailure::from_error(anyhow::anyhow!("boom"));
        assert_eq!(policy.classify(&other), Disposition::Absorb);
        assert_eq!(other.message(), "boom");
    }

    #[test]
    fn test_any_panic_is_an_assertion() {
        let explicit = CallbackFailure::from_panic(Box::new("boom"));
        assert!(explicit.is_assertion());
        assert_eq!(AssertionsOnly.classify(&explicit), Disposition::Propagate);

        let unwrapped = CallbackFailure::from_panic(Box::new("called `Option::unwrap()` on a `None` value"));
        assert_eq!(AssertionsOnly.classify(&unwrapped), Disposition::Propagate);
    }

    #[test]
    fn test_propagate_all_policy() {
        let other = CallbackFailure::from_error(anyhow::anyhow!("boom"));
        assert_eq!(PropagateAll.classify(&other), Disposition::Propagate);
    }

    #[test]
    fn test_panic_messages() {
        let owned = CallbackFailure::from_panic(Box::new(String::from("left: 1")));
        assert_eq!(owned.message(), "left: 1");
        let opaque = CallbackFailure::from_panic(Box::new(17u8));
        assert_eq!(opaque.message(), "non-string panic payload");
        assert!(check(1).is_ok());
    }

    #[test]
    fn test_assertion_behind_context() {
        let err = anyhow::Error::new(AssertionFailed::new("depth")).context("checking orders queue");
        assert!(CallbackFailure::from_error(err).is_assertion());
    }
}
