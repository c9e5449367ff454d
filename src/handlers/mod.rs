pub(crate) mod duitku_handlers;
