use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::MethodDescriptor;

/// Number of declared parameters in a method descriptor.
pub(crate) fn method_param_count(descriptor: &str) -> Result<usize> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("parse method descriptor {descriptor}"))?;
    Ok(parsed.parameter_types().len())
}

/// Raw parameter list between the parentheses, e.g. `Ljava/lang/String;I`.
pub(crate) fn parameter_section(descriptor: &str) -> Option<&str> {
    let rest = descriptor.strip_prefix('(')?;
    let (params, _) = rest.split_once(')')?;
    Some(params)
}

/// Raw return type after the closing parenthesis, e.g. `Z` or `Ljava/lang/Object;`.
pub(crate) fn return_section(descriptor: &str) -> Option<&str> {
    let (_, ret) = descriptor.split_once(')')?;
    if ret.is_empty() { None } else { Some(ret) }
}

/// Check that `replacement` takes the receiver of `owner` explicitly and is
/// otherwise identical to `original`.
///
/// Both descriptors must parse; the replacement parameter list must be
/// `L<owner>;` followed by the original list, with the same return type.
pub(crate) fn lifts_receiver(owner: &str, original: &str, replacement: &str) -> Result<bool> {
    let original_count = method_param_count(original)?;
    let replacement_count = method_param_count(replacement)?;
    if replacement_count != original_count + 1 {
        return Ok(false);
    }

    let receiver = receiver_descriptor(owner);
    let (Some(original_params), Some(replacement_params)) =
        (parameter_section(original), parameter_section(replacement))
    else {
        return Ok(false);
    };
    let Some(explicit_params) = replacement_params.strip_prefix(receiver.as_str()) else {
        return Ok(false);
    };

    Ok(explicit_params == original_params
        && return_section(original) == return_section(replacement))
}

fn receiver_descriptor(owner: &str) -> String {
    if owner.starts_with('[') {
        owner.to_string()
    } else {
        format!("L{owner};")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATCHER: &str = "(Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;";
    const CHECK_REG: &str =
        "(Ljava/util/regex/Pattern;Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;";

    #[test]
    fn counts_parameters() {
        assert_eq!(method_param_count("()V").expect("count"), 0);
        assert_eq!(method_param_count("(IJ[Ljava/lang/String;)V").expect("count"), 3);
        assert!(method_param_count("not a descriptor").is_err());
    }

    #[test]
    fn splits_parameter_and_return_sections() {
        assert_eq!(parameter_section(MATCHER), Some("Ljava/lang/CharSequence;"));
        assert_eq!(return_section(MATCHER), Some("Ljava/util/regex/Matcher;"));
        assert_eq!(parameter_section("V"), None);
    }

    #[test]
    fn receiver_lift_accepts_prepended_owner() {
        assert!(lifts_receiver("java/util/regex/Pattern", MATCHER, CHECK_REG).expect("lift"));
    }

    #[test]
    fn receiver_lift_rejects_changed_return_or_missing_receiver() {
        assert!(
            !lifts_receiver(
                "java/util/regex/Pattern",
                MATCHER,
                "(Ljava/util/regex/Pattern;Ljava/lang/CharSequence;)Z"
            )
            .expect("lift")
        );
        assert!(!lifts_receiver("java/util/regex/Pattern", MATCHER, MATCHER).expect("lift"));
        assert!(!lifts_receiver("java/lang/String", MATCHER, CHECK_REG).expect("lift"));
    }
}
