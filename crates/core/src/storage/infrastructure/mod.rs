pub mod file_record_store;
