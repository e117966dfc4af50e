//! Error handling foundation for sso-portal.
//!
//! Only the `Result` alias lives here. Each crate defines its own error
//! enums next to the code that produces them and wraps them in a
//! rootcause `Report` where a layer boundary is crossed.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Broken;

    impl std::fmt::Display for Broken {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "broken")
        }
    }

    impl std::error::Error for Broken {}

    fn fails() -> Result<u8, Broken> {
        Err(Broken)?
    }

    #[test]
    fn ok_values_pass_through() {
        let ok: Result<i32> = Ok(7);
        assert_eq!(ok.expect("should be ok"), 7);
    }

    #[test]
    fn domain_errors_convert_into_reports() {
        let err = fails().expect_err("should fail");
        assert!(err.to_string().contains("broken"));
    }
}
