//! The image column micro-format: `path*ticks*type*width*height*blurhash`, several
//! entries joined with `|`. Only the leading path of each entry is ever touched.

/// Paths of every non-empty entry, in order.
pub fn image_paths(value: &str) -> Vec<&str> {
    value
        .split('|')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| entry.split('*').next())
        .filter(|path| !path.is_empty())
        .collect()
}

/// Replace the path of each entry with `rewrite(path)` when it returns `Some`.
/// Returns the new string when at least one entry changed.
pub fn rewrite_image_list<F>(value: &str, mut rewrite: F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut changed = false;
    let entries: Vec<String> = value
        .split('|')
        .map(|entry| {
            if entry.is_empty() {
                return String::new();
            }
            let (path, rest) = match entry.find('*') {
                Some(i) => (&entry[..i], &entry[i..]),
                None => (entry, ""),
            };
            match rewrite(path) {
                Some(new_path) if new_path != path => {
                    changed = true;
                    format!("{}{}", new_path, rest)
                }
                _ => entry.to_string(),
            }
        })
        .collect();

    if changed {
        Some(entries.join("|"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGES: &str = "F:\\Movies\\Alien\\poster.jpg*637693022742223153*Primary*198*198*eJC5#hK|\
%MetadataPath%\\library\\71\\backdrop.jpg*637693022742223153*Backdrop*1920*1080*";

    #[test]
    fn test_image_paths() {
        assert_eq!(
            image_paths(IMAGES),
            vec![
                "F:\\Movies\\Alien\\poster.jpg",
                "%MetadataPath%\\library\\71\\backdrop.jpg"
            ]
        );
    }

    #[test]
    fn test_rewrite_only_touches_paths() {
        let out = rewrite_image_list(IMAGES, |p| {
            p.strip_prefix("F:\\Movies")
                .map(|rest| format!("/data/movies{}", rest.replace('\\', "/")))
        })
        .unwrap();
        assert_eq!(
            out,
            "/data/movies/Alien/poster.jpg*637693022742223153*Primary*198*198*eJC5#hK|\
%MetadataPath%\\library\\71\\backdrop.jpg*637693022742223153*Backdrop*1920*1080*"
        );
    }

    #[test]
    fn test_no_change_returns_none() {
        assert_eq!(rewrite_image_list(IMAGES, |_| None), None);
        assert_eq!(rewrite_image_list("", |_| Some("x".into())), None);
    }
}
