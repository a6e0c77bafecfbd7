// Technical indicators fed into the market-data prompt lines

pub mod adx;

pub use adx::{attach_adx, directional_index_series, wilder_smooth, DirectionalSeries};
