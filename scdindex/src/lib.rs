// data module
pub mod data {
    pub mod lattice;
    pub mod orientation;
    pub mod peak;
}

// algorithm module
pub mod algorithm {
    pub mod classify;
    pub mod index;
    pub mod refine;
    pub mod residual;
    pub mod search;
}

// io module
pub mod io {
    pub mod report;
}
