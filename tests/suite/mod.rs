mod diagnostics;
mod lifecycle;
mod scope;
