mod common;
mod requests;
mod routing;
