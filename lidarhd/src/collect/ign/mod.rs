pub mod tile_index;
