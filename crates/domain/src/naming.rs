//! Wire-token normalization.
//!
//! Backends describe enumerated values with free-form tokens
//! (`brightness_up`, `arrow-left-click`, `"salt & pepper"`). [`normalize`]
//! turns such a token into the `UpperCamelCase` style of Rust enum variants
//! so that closed enumerations can be matched without per-value tables.

/// Convert a wire token into an enum-variant style identifier.
///
/// - `_`, `-`, space, quotes and any other run of non-alphanumeric characters
///   separate words;
/// - `&` becomes the word `And`;
/// - each word gets its first letter upper-cased, the rest is kept as-is;
/// - if the result starts with a digit, `digit_prefix` is prepended.
#[must_use]
pub fn normalize(token: &str, digit_prefix: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut at_word_start = true;

    for c in token.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
                at_word_start = false;
            } else {
                out.push(c);
            }
        } else {
            if c == '&' {
                out.push_str("And");
            }
            at_word_start = true;
        }
    }

    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, digit_prefix);
    }
    out
}

/// A closed enumeration whose variants can be looked up from wire tokens.
///
/// Implement it with [`wire_enum!`](crate::wire_enum) rather than by hand.
pub trait WireEnum: Sized + Copy + 'static {
    /// Name used in error messages.
    const NAME: &'static str;

    /// Word prepended to tokens that start with a digit.
    const DIGIT_PREFIX: &'static str = "N";

    /// Every variant paired with its identifier text.
    fn variants() -> &'static [(&'static str, Self)];

    /// Look up a variant from a raw wire token, case-insensitively after
    /// normalization.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownVariant`](crate::error::ParseError::UnknownVariant)
    /// when no variant matches.
    fn from_wire(token: &str) -> Result<Self, crate::error::ParseError> {
        let normalized = normalize(token, Self::DIGIT_PREFIX);
        Self::variants()
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&normalized))
            .map(|(_, value)| *value)
            .ok_or_else(|| crate::error::ParseError::UnknownVariant {
                enum_name: Self::NAME,
                token: token.to_string(),
                normalized,
            })
    }
}

/// Declare a fieldless enum together with its [`WireEnum`] implementation.
///
/// ```
/// trellis_domain::wire_enum! {
///     /// Buttons on a remote.
///     pub enum RemoteButton {
///         BrightnessUp,
///         BrightnessDown,
///         Button1Click,
///     }
///     prefix = "Button";
/// }
///
/// use trellis_domain::naming::WireEnum;
/// assert_eq!(RemoteButton::from_wire("brightness_up").unwrap(), RemoteButton::BrightnessUp);
/// assert_eq!(RemoteButton::from_wire("1_click").unwrap(), RemoteButton::Button1Click);
/// ```
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident),+ $(,)?
        }
        $(prefix = $prefix:literal;)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $crate::naming::WireEnum for $name {
            const NAME: &'static str = stringify!($name);
            $(const DIGIT_PREFIX: &'static str = $prefix;)?

            fn variants() -> &'static [(&'static str, Self)] {
                &[$((stringify!($variant), Self::$variant)),+]
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;

    crate::wire_enum! {
        enum Action {
            BrightnessUp,
            ArrowLeftClick,
            SaltAndPepper,
            Button1Single,
            On,
        }
        prefix = "Button";
    }

    crate::wire_enum! {
        enum Plain {
            Idle,
        }
    }

    #[test]
    fn should_join_underscore_separated_words() {
        assert_eq!(normalize("brightness_up", "N"), "BrightnessUp");
        assert_eq!(normalize("arrow_left_click", "N"), "ArrowLeftClick");
    }

    #[test]
    fn should_spell_out_ampersand() {
        assert_eq!(normalize("salt & pepper", "N"), "SaltAndPepper");
    }

    #[test]
    fn should_split_on_dashes_spaces_and_quotes() {
        assert_eq!(normalize("color-temp 'warm'", "N"), "ColorTempWarm");
        assert_eq!(normalize("\"heat\"", "N"), "Heat");
    }

    #[test]
    fn should_collapse_other_punctuation_runs() {
        assert_eq!(normalize("on//off!!mode", "N"), "OnOffMode");
    }

    #[test]
    fn should_prefix_tokens_starting_with_digit() {
        assert_eq!(normalize("1_single", "Button"), "Button1Single");
        assert_eq!(normalize("2nd floor", "Level"), "Level2ndFloor");
    }

    #[test]
    fn should_keep_inner_capitals() {
        assert_eq!(normalize("colorTemp", "N"), "ColorTemp");
    }

    #[test]
    fn should_return_empty_string_for_separator_only_token() {
        assert_eq!(normalize("__", "N"), "");
    }

    #[test]
    fn should_match_variant_case_insensitively() {
        assert_eq!(Action::from_wire("BRIGHTNESS_UP").unwrap(), Action::BrightnessUp);
        assert_eq!(Action::from_wire("on").unwrap(), Action::On);
        assert_eq!(Action::from_wire("salt & pepper").unwrap(), Action::SaltAndPepper);
    }

    #[test]
    fn should_use_enum_prefix_for_digit_tokens() {
        assert_eq!(Action::from_wire("1_single").unwrap(), Action::Button1Single);
    }

    #[test]
    fn should_default_digit_prefix_when_not_declared() {
        assert_eq!(Plain::DIGIT_PREFIX, "N");
        assert_eq!(Plain::from_wire("idle").unwrap(), Plain::Idle);
    }

    #[test]
    fn should_report_unknown_token() {
        let err = Action::from_wire("double_tap").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownVariant {
                enum_name: "Action",
                token: "double_tap".to_string(),
                normalized: "DoubleTap".to_string(),
            }
        );
    }
}
