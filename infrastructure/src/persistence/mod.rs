pub mod codec;
pub mod file_repository;
pub mod in_memory_repository;

// Re-export the codec and both repository types
pub use codec::JsonSchemaCodec;
pub use file_repository::FileSchemaRepository;
pub use in_memory_repository::InMemorySchemaRepository;
