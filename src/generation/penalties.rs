//! Logit post-processing applied between the model forward pass and beam
//! candidate selection.

/// Ban every token that would complete an n-gram already present in
/// `tokens`. The last n-1 tokens form the current prefix; any historical
/// n-gram starting with that prefix bans its completing token.
pub fn apply_no_repeat_ngram(logits: &mut [f32], tokens: &[u32], ngram_size: usize) {
    let n = ngram_size;
    if n == 0 || tokens.len() + 1 < n {
        return;
    }

    let current_prefix = &tokens[tokens.len() - (n - 1)..];

    for window in tokens.windows(n) {
        if &window[..n - 1] == current_prefix {
            let banned = window[n - 1] as usize;
            if banned < logits.len() {
                logits[banned] = f32::NEG_INFINITY;
            }
        }
    }
}

/// Constrain the next token to exactly `token` by masking everything else.
pub fn force_token(logits: &mut [f32], token: u32) {
    for l in logits.iter_mut() {
        *l = f32::NEG_INFINITY;
    }
    if let Some(l) = logits.get_mut(token as usize) {
        *l = 0.0;
    }
}

/// Numerically stable log-softmax over a logit row.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max_val == f32::NEG_INFINITY {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let log_sum: f32 = logits
        .iter()
        .map(|&x| (x - max_val).exp())
        .sum::<f32>()
        .ln();
    logits.iter().map(|&x| x - max_val - log_sum).collect()
}

/// Top-k entries of a log-probability row, sorted descending.
pub fn top_k_log_probs(log_probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = log_probs
        .iter()
        .enumerate()
        .map(|(i, &lp)| (i as u32, lp))
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}
