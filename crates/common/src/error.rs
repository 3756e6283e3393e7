//! Error-context plumbing shared by the crate-local error enums.

/// Error types that can be built from a plain message string.
///
/// Each doozer crate implements this for its own `Error` and then invokes
/// [`impl_context!`](crate::impl_context) inside its error module.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait adding `.context()` and
/// `.with_context()` to `Result` and `Option`.
///
/// The invoking module must define `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // crates/config/src/error.rs
/// doozer_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            /// Wrap the failure with a fixed prefix.
            fn context(self, context: impl Into<String>) -> Result<T>;

            /// Wrap the failure with a lazily built prefix.
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let prefix = context.into();
                self.map_err(|err| {
                    <Error as $crate::FromMessage>::from_message(format!("{prefix}: {err}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|err| {
                    let prefix = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{prefix}: {err}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
