/// Convert a SQL LIKE pattern to an anchored regex pattern: `%` matches any
/// run, `_` matches one character, everything else is literal.
fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                regex.push_str(&regex::escape(&chars[i].to_string()));
            }
            c if ".*+?^${}()|[]\\".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
        i += 1;
    }

    regex.push('$');
    regex
}

/// Case-insensitive LIKE match. The empty pattern matches everything.
pub fn like_match(text: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let regex_pattern = like_to_regex(pattern);
    match regex::RegexBuilder::new(&regex_pattern)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.is_match(text),
        // Escaping above keeps the translation total; an unexpected build
        // failure just means "no match" for this row.
        Err(_) => false,
    }
}
