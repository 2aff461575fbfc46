/// Rewrite the URL of each `srcset` candidate (`url [descriptor]`, comma
/// separated). Returns `None` when nothing changed.
pub fn rewrite_srcset(value: &str, mut rewrite: impl FnMut(&str) -> Option<String>) -> Option<String> {
    let mut changed = false;
    let candidates: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| {
            let (url, descriptor) = match candidate.split_once(char::is_whitespace) {
                Some((url, descriptor)) => (url, Some(descriptor.trim())),
                None => (candidate, None),
            };
            let url = match rewrite(url) {
                Some(replacement) => {
                    changed = true;
                    replacement
                }
                None => url.to_string(),
            };
            match descriptor {
                Some(descriptor) if !descriptor.is_empty() => format!("{url} {descriptor}"),
                _ => url,
            }
        })
        .collect();

    changed.then(|| candidates.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_descriptors() {
        let rewritten = rewrite_srcset("a.png 1x,  b.png   2x, c.png", |url| {
            (url != "b.png").then(|| format!("/p/{url}"))
        });
        assert_eq!(rewritten.as_deref(), Some("/p/a.png 1x, b.png 2x, /p/c.png"));
    }

    #[test]
    fn unchanged_is_none() {
        assert_eq!(rewrite_srcset("a.png 100w", |_| None), None);
    }
}
