/// Lays `items` out row-major in as many columns as fit `width`.
///
/// Every cell is padded to the widest item and cells are separated by two
/// spaces. When only one column fits, items are printed one per line
/// without padding.
pub fn columnize<S: AsRef<str>>(items: &[S], width: usize) -> String {
    if items.is_empty() {
        return String::new();
    }
    let widest = items
        .iter()
        .map(|item| item.as_ref().chars().count())
        .max()
        .unwrap_or(0);
    let cols = (width / widest.saturating_add(2)).max(1);
    if cols == 1 {
        return items
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
    }

    items
        .chunks(cols)
        .map(|row| {
            row.iter()
                .map(|item| format!("{:<widest$}", item.as_ref()))
                .collect::<Vec<_>>()
                .join("  ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
