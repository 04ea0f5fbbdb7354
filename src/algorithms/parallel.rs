//! Block-partitioned parallel SGD epochs.
//!
//! Users and items are split into `n` contiguous index ranges. An epoch runs
//! `n` strata; stratum `s` trains the cells `(b, (b + s) % n)` concurrently,
//! one thread per cell, so no two threads ever write the same user or item
//! row. Each thread reads the global bias as its start-of-stratum value plus
//! its own running delta; the deltas are summed once the stratum finishes.
//!
//! Record order inside a cell follows the epoch order, but cells are visited
//! stratum by stratum, so results differ from a sequential sweep and depend
//! on the block count.

use crate::algorithms::optimizer::Sgd;
use crate::algorithms::params::ParameterStore;
use crate::algorithms::trainer::SweepTotals;
use crate::models::IndexedRating;
use crate::utils::metrics::MetricsAccumulator;
use ndarray::Axis;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Record positions bucketed by (user block, item block).
#[derive(Debug, Clone)]
pub(crate) struct BlockGrid {
    n_blocks: usize,
    user_chunk: usize,
    item_chunk: usize,
    cells: Vec<Vec<usize>>,
}

impl BlockGrid {
    pub fn new(n_users: usize, n_items: usize, n_blocks: usize) -> Self {
        let n_blocks = n_blocks.max(1);
        Self {
            n_blocks,
            user_chunk: n_users.div_ceil(n_blocks).max(1),
            item_chunk: n_items.div_ceil(n_blocks).max(1),
            cells: vec![Vec::new(); n_blocks * n_blocks],
        }
    }

    fn cell_index(&self, user_block: usize, item_block: usize) -> usize {
        user_block * self.n_blocks + item_block
    }

    pub fn cell(&self, user_block: usize, item_block: usize) -> &[usize] {
        &self.cells[self.cell_index(user_block, item_block)]
    }

    pub fn fill(&mut self, train: &[IndexedRating], order: &[usize]) {
        for cell in &mut self.cells {
            cell.clear();
        }
        for &position in order {
            let record = &train[position];
            let cell = self.cell_index(record.user / self.user_chunk, record.item / self.item_chunk);
            self.cells[cell].push(position);
        }
    }
}

#[derive(Debug, Default)]
struct CellTotals {
    errors: MetricsAccumulator,
    penalty: f64,
    global_delta: f64,
}

pub(crate) fn run_epoch(
    pool: &ThreadPool,
    sgd: &Sgd,
    params: &mut ParameterStore,
    train: &[IndexedRating],
    grid: &BlockGrid,
) -> SweepTotals {
    let n = grid.n_blocks;
    let mut totals = SweepTotals::default();

    for stratum in 0..n {
        let global_bias = params.global_bias;
        let results: Vec<CellTotals> = {
            let ParameterStore {
                user_factors,
                item_factors,
                user_bias,
                item_bias,
                ..
            } = &mut *params;

            let mut user_blocks: Vec<Option<_>> = user_factors
                .axis_chunks_iter_mut(Axis(0), grid.user_chunk)
                .zip(user_bias.axis_chunks_iter_mut(Axis(0), grid.user_chunk))
                .map(Some)
                .collect();
            let mut item_blocks: Vec<Option<_>> = item_factors
                .axis_chunks_iter_mut(Axis(0), grid.item_chunk)
                .zip(item_bias.axis_chunks_iter_mut(Axis(0), grid.item_chunk))
                .map(Some)
                .collect();

            let jobs: Vec<_> = (0..n)
                .filter_map(|user_block| {
                    let item_block = (user_block + stratum) % n;
                    let users = user_blocks.get_mut(user_block)?.take()?;
                    let items = item_blocks.get_mut(item_block)?.take()?;
                    Some((user_block, item_block, users, items))
                })
                .collect();

            pool.install(|| {
                jobs.into_par_iter()
                    .map(|(user_block, item_block, (mut uf, mut ub), (mut itf, mut itb))| {
                        let user_offset = user_block * grid.user_chunk;
                        let item_offset = item_block * grid.item_chunk;
                        let mut cell = CellTotals::default();

                        for &position in grid.cell(user_block, item_block) {
                            let record = &train[position];
                            let u = record.user - user_offset;
                            let i = record.item - item_offset;
                            let outcome = sgd.step(
                                uf.row_mut(u),
                                &mut ub[u],
                                itf.row_mut(i),
                                &mut itb[i],
                                global_bias + cell.global_delta,
                                record.rating,
                            );
                            cell.global_delta += sgd.learning_rate() * outcome.error;
                            cell.errors.push_error(outcome.error);
                            cell.penalty += outcome.penalty;
                        }
                        cell
                    })
                    .collect()
            })
        };

        for cell in results {
            params.global_bias += cell.global_delta;
            totals.errors.merge(&cell.errors);
            totals.penalty += cell.penalty;
        }
    }

    totals
}
