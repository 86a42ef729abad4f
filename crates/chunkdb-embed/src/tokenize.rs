use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// Token tensors for one padded batch, each `[batch, tokens]`.
pub struct TokenBatch {
    pub input_ids: Tensor,
    pub token_type_ids: Tensor,
    pub attention_mask: Tensor,
}

/// Encode `texts`, truncate each to `max_len` tokens and right-pad to the
/// longest sequence in the batch.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<TokenBatch> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let pad_id = tokenizer.token_to_id("[PAD]").unwrap_or(0);

    let longest = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(0).max(1);
    let batch = encodings.len();
    let mut ids = Vec::with_capacity(batch * longest);
    let mut type_ids = Vec::with_capacity(batch * longest);
    let mut mask = Vec::with_capacity(batch * longest);

    for enc in &encodings {
        let n = enc.get_ids().len().min(longest);
        ids.extend_from_slice(&enc.get_ids()[..n]);
        type_ids.extend_from_slice(&enc.get_type_ids()[..n]);
        mask.extend_from_slice(&enc.get_attention_mask()[..n]);
        let pad = longest - n;
        ids.extend(std::iter::repeat(pad_id).take(pad));
        type_ids.extend(std::iter::repeat(0).take(pad));
        mask.extend(std::iter::repeat(0).take(pad));
    }

    Ok(TokenBatch {
        input_ids: Tensor::from_vec(ids, (batch, longest), device)?,
        token_type_ids: Tensor::from_vec(type_ids, (batch, longest), device)?,
        attention_mask: Tensor::from_vec(mask, (batch, longest), device)?,
    })
}
