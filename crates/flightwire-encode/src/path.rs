//! Graph paths for diagnostics.
//!
//! Classification and cycle errors carry the offending value's position in
//! the graph, rendered like `$.users[2].name`.

/// One step from a container into a child position.
#[derive(Debug, Clone)]
pub enum PathSegment {
    Key(String),
    Index(usize),
    MapKey(usize),
    MapValue(usize),
    SetEntry(usize),
}

/// Render a path from the root, `$`.
pub fn render(segments: &[PathSegment]) -> String {
    let mut out = String::from("$");
    for segment in segments {
        match segment {
            PathSegment::Key(key) => {
                out.push('.');
                out.push_str(key);
            }
            PathSegment::Index(i) => out.push_str(&format!("[{i}]")),
            PathSegment::MapKey(i) => out.push_str(&format!("[map:key#{i}]")),
            PathSegment::MapValue(i) => out.push_str(&format!("[map:value#{i}]")),
            PathSegment::SetEntry(i) => out.push_str(&format!("[set#{i}]")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_positions() {
        let path = [
            PathSegment::Key("users".into()),
            PathSegment::Index(2),
            PathSegment::Key("name".into()),
        ];
        assert_eq!(render(&path), "$.users[2].name");
    }

    #[test]
    fn renders_root_and_collection_segments() {
        assert_eq!(render(&[]), "$");
        assert_eq!(
            render(&[PathSegment::MapKey(0), PathSegment::SetEntry(3)]),
            "$[map:key#0][set#3]"
        );
    }
}
