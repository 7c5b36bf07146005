//! Sparse Search using Tantivy (BM25)
//!
//! Lexical side of the hybrid retriever. The analyzer lowercases and
//! ASCII-folds tokens so accented French clinical text matches unaccented
//! queries (and vice versa). Entries are keyed by chunk id and upserts are
//! idempotent: re-indexing a document replaces its entries.

use std::path::Path;

use tantivy::{
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, TermQuery},
    schema::{
        Field, IndexRecordOption, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED,
        STRING,
    },
    tokenizer::{AsciiFoldingFilter, LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer},
    Index, IndexReader, TantivyDocument, Term,
};

use crate::RagError;

const TOKENIZER_NAME: &str = "folding";
const WRITER_BUFFER_BYTES: usize = 50_000_000;
const MAX_TOKEN_LEN: usize = 40;

/// Lexical inverted index for one patient corpus.
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    analyzer: TextAnalyzer,
    id_field: Field,
    content_field: Field,
}

impl SparseIndex {
    /// Create the index under `dir` if absent, open it otherwise. An
    /// unavailable backend (unwritable directory, corrupt index) is a
    /// configuration error.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RagError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| RagError::Configuration(format!("cannot create {}: {e}", dir.display())))?;

        let mut schema_builder = Schema::builder();
        let content_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(TOKENIZER_NAME)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", content_options);
        let schema = schema_builder.build();

        let mmap = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| RagError::Configuration(e.to_string()))?;
        let index = Index::open_or_create(mmap, schema)
            .map_err(|e| RagError::Configuration(e.to_string()))?;

        let analyzer = build_analyzer();
        index.tokenizers().register(TOKENIZER_NAME, analyzer.clone());

        let reader = index
            .reader()
            .map_err(|e| RagError::Configuration(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            analyzer,
            id_field,
            content_field,
        })
    }

    /// Add or replace the entry for `id`.
    pub fn upsert(&self, id: &str, text: &str) -> Result<(), RagError> {
        self.upsert_all([(id, text)])
    }

    /// Add or replace a batch of entries in one commit.
    pub fn upsert_all<'a, I>(&self, entries: I) -> Result<(), RagError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut writer = self
            .index
            .writer(WRITER_BUFFER_BYTES)
            .map_err(|e| RagError::Index(e.to_string()))?;

        for (id, text) in entries {
            writer.delete_term(Term::from_field_text(self.id_field, id));
            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, id);
            doc.add_text(self.content_field, text);
            writer
                .add_document(doc)
                .map_err(|e| RagError::Index(e.to_string()))?;
        }

        writer.commit().map_err(|e| RagError::Index(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RagError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25-ranked search. The query runs through the same analyzer as the
    /// indexed content; a query with no surviving tokens returns an empty
    /// result rather than an error.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>, RagError> {
        let tokens = self.tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(self.content_field, token);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RagError::Search(e.to_string()))?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|value| match value {
                    OwnedValue::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .unwrap_or("")
                .to_string();
            results.push((id, score));
        }
        Ok(results)
    }

    /// Tokens the analyzer produces for `text`.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }

    /// Number of indexed entries.
    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

fn build_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build()
}
