//! Mnemograph retrieval — embeddings, vector stores, BM25+, RRF, hybrid search

pub mod embed;
pub mod fuse;
pub mod hybrid;
pub mod lexical;
pub mod vector;

pub use embed::{cosine, Embedder, HashEmbedder, DEFAULT_DIMENSION};
pub use fuse::{rank_of, reciprocal_rank_fusion, RRF_K};
pub use hybrid::{
    CommunityHit, HybridRetriever, RankerRanks, RetrievalResult, SearchMode, SymbolHit,
};
pub use lexical::{LexicalDoc, LexicalIndex};
pub use vector::{
    episodes_collection, symbols_collection, MemoryVectorStore, QdrantStore, ScoredPoint,
    SearchFilter, VectorPoint, VectorStore,
};
