//! "Did you mean ...?" suggestions based on edit distance.

/// Compute the Levenshtein edit distance between two strings.
///
/// Unweighted, character-wise. Used to pick the closest candidate when a
/// named entity (package, remote, usage key) is not found.
pub fn lev_edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let n_rows = b.len() + 1;
    let n_columns = a.len() + 1;

    let mut matrix = vec![vec![0usize; n_columns]; n_rows];

    for (n, cell) in matrix[0].iter_mut().enumerate() {
        *cell = n;
    }
    for (n, row) in matrix.iter_mut().enumerate() {
        row[0] = n;
    }

    for row in 1..n_rows {
        for col in 1..n_columns {
            let cost = usize::from(a[col - 1] != b[row - 1]);
            let t1 = matrix[row - 1][col] + 1;
            let t2 = matrix[row][col - 1] + 1;
            let t3 = matrix[row - 1][col - 1] + cost;
            matrix[row][col] = t1.min(t2).min(t3);
        }
    }

    matrix[n_rows - 1][n_columns - 1]
}

/// Return the candidate closest to `given`, or `None` if there are no
/// candidates. Ties are broken by enumeration order, so an exact match
/// always wins.
pub fn did_you_mean<I, S>(given: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut best: Option<(usize, String)> = None;
    for cand in candidates {
        let cand = cand.as_ref();
        let dist = lev_edit_distance(given, cand);
        match &best {
            Some((best_dist, _)) if dist >= *best_dist => {}
            _ => best = Some((dist, cand.to_string())),
        }
    }
    best.map(|(_, s)| s)
}
