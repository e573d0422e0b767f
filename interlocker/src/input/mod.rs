pub mod interlocking_table;
pub mod table_parser;
pub mod scenario;
