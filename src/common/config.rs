// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use crate::novarocks_config::config as novarocks_app_config;

pub(crate) fn remote_async_read() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.remote.async_read)
        .unwrap_or(true)
}

pub(crate) fn remote_add_aggregation_info() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.remote.add_aggregation_info)
        .unwrap_or(false)
}

pub(crate) fn remote_add_totals() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.remote.add_totals)
        .unwrap_or(false)
}

pub(crate) fn remote_add_extremes() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.remote.add_extremes)
        .unwrap_or(false)
}
