pub mod duitku;
