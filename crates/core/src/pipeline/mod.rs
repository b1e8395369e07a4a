pub mod scan_library_use_case;
