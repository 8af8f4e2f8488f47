/// Splits one raw line into trimmed fields.
///
/// A double quote toggles quoted state; while quoted, the delimiter is literal
/// text. Quote characters themselves are never emitted. Doubled quotes inside
/// a quoted field are NOT unescaped to a literal quote; the upstream export
/// has not been observed to produce them, and matching the toggle behavior
/// exactly keeps re-runs comparable with the reference output.
pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == delimiter && !in_quotes {
            fields.push(field.trim().to_string());
            field.clear();
        } else {
            field.push(ch);
        }
    }
    // The field after the last delimiter is always emitted, even when empty.
    fields.push(field.trim().to_string());
    fields
}
