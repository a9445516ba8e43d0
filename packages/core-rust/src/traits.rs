use crate::error::ValidationError;

/// Self-validation capability a request type may opt in to.
pub trait Validate {
    /// Checks the request's own invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first violated invariant.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// A request message accepted by the pipeline.
///
/// `validator()` is the type-safe optional cast the validation unit uses to
/// discover the [`Validate`] capability. Types that implement `Validate`
/// override it to return `Some(self)`.
pub trait Message: Send + 'static {
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }
}

impl Message for () {}

impl Message for String {}

impl Message for Vec<u8> {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(String);

    impl Validate for Named {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.0.is_empty() {
                return Err(ValidationError::for_field("name", "must not be empty"));
            }
            Ok(())
        }
    }

    impl Message for Named {
        fn validator(&self) -> Option<&dyn Validate> {
            Some(self)
        }
    }

    #[test]
    fn plain_messages_have_no_validator() {
        assert!(().validator().is_none());
        assert!("hello".to_string().validator().is_none());
    }

    #[test]
    fn opted_in_messages_expose_validator() {
        let ok = Named("a".into());
        assert!(ok.validator().unwrap().validate().is_ok());

        let bad = Named(String::new());
        let err = bad.validator().unwrap().validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("name"));
    }
}
