/// ログ出力用に秘匿値の先頭4文字だけを残す。
pub(crate) fn redact(input: &str) -> String {
    match input.char_indices().nth(4) {
        Some((idx, _)) => format!("{}***", &input[..idx]),
        None => "****".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::redact;

    #[test]
    fn short_values_are_fully_masked() {
        assert_eq!(redact("abcd"), "****");
        assert_eq!(redact(""), "****");
    }

    #[test]
    fn long_values_keep_prefix_only() {
        assert_eq!(redact("sync@project.iam"), "sync***");
    }

    #[test]
    fn multibyte_prefix_is_not_split() {
        assert_eq!(redact("医科歯科連携キー"), "医科歯科***");
    }
}
