use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING};

/// Handles for every field of the chunk schema.
#[derive(Debug, Clone, Copy)]
pub struct ChunkFields {
    pub chunk_id: Field,
    pub document_id: Field,
    pub user_id: Field,
    pub source: Field,
    pub page_number: Field,
    pub chunk_index: Field,
    pub tags: Field,
    pub created_at: Field,
    pub content: Field,
}

/// Filterable fields are raw `STRING` terms so matching is exact and
/// case-sensitive. `tags` is multi-valued. `created_at` holds epoch millis
/// and is omitted for records that were never stamped.
pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("chunk_id", STRING | STORED);
    builder.add_text_field("document_id", STRING | STORED);
    builder.add_text_field("user_id", STRING | STORED);
    builder.add_text_field("source", STRING | STORED);
    builder.add_u64_field("page_number", INDEXED | STORED | FAST);
    builder.add_u64_field("chunk_index", STORED);
    builder.add_text_field("tags", STRING | STORED);
    builder.add_i64_field("created_at", STORED | FAST);
    builder.add_text_field("content", STORED);
    builder.build()
}

pub fn resolve_fields(schema: &Schema) -> tantivy::Result<ChunkFields> {
    Ok(ChunkFields {
        chunk_id: schema.get_field("chunk_id")?,
        document_id: schema.get_field("document_id")?,
        user_id: schema.get_field("user_id")?,
        source: schema.get_field("source")?,
        page_number: schema.get_field("page_number")?,
        chunk_index: schema.get_field("chunk_index")?,
        tags: schema.get_field("tags")?,
        created_at: schema.get_field("created_at")?,
        content: schema.get_field("content")?,
    })
}
